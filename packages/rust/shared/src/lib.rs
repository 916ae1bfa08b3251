//! Shared types, error model, and configuration for leadscore.
//!
//! This crate is the foundation depended on by all other leadscore crates.
//! It provides:
//! - [`LeadScoreError`]: the unified error type
//! - Domain types ([`Identifier`], [`Record`], [`GradingResult`], [`Batch`])
//! - Configuration ([`AppConfig`], [`Credentials`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    ApifyConfig, AppConfig, CacheConfig, Credentials, MAX_CHUNK_SIZE, OpenAiConfig,
    PerplexityConfig, RetryConfig, ScoringConfig, TargetConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from,
};
pub use error::{LeadScoreError, Result};
pub use types::{Batch, GradingResult, Identifier, ProfileHint, Record};
