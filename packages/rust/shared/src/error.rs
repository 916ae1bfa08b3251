//! Error types for leadscore.
//!
//! Library crates use [`LeadScoreError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all leadscore operations.
#[derive(Debug, thiserror::Error)]
pub enum LeadScoreError {
    /// Configuration loading or validation error, including missing credentials.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error that is not tied to a specific remote call kind.
    #[error("network error: {0}")]
    Network(String),

    /// A remote call (chat, web search, profile fetch) failed after retries.
    #[error("remote error: {0}")]
    Remote(String),

    /// Provider payload or input file could not be parsed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Response cache error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Input validation error (missing column, no usable identifiers, bad ranges).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The run was interrupted before this operation could finish.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, LeadScoreError>;

impl LeadScoreError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
