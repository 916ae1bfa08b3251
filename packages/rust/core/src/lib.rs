//! Core pipeline orchestration and domain logic for leadscore.
//!
//! This crate ties together identifier input, profile fetching, the
//! per-record grading protocol, parallel dispatch and CSV output into the
//! end-to-end `score_leads` workflow.

pub mod dispatch;
pub mod input;
pub mod pipeline;
pub mod prompts;
pub mod score;
pub mod scorer;
pub mod sink;

pub use dispatch::{DispatchOutcome, DispatchProgress, FailedItem, SilentDispatchProgress, dispatch};
pub use pipeline::{ProgressReporter, ScoreConfig, ScoreRun, SilentProgress, score_leads};
pub use prompts::Prompts;
pub use score::extract_score;
pub use scorer::{CallKind, LeadScorer, Scorer, ScorerSettings};
