//! leadscore-remote: clients for the language-model and web-search APIs.
//!
//! Both clients retry transient failures with a bounded [`RetryPolicy`] and
//! pace requests through a per-client [`RateLimiter`]. The scoring stages
//! depend on the [`ChatApi`] and [`SearchApi`] traits so tests can swap in
//! in-memory fakes.

pub mod chat;
pub mod http;
pub mod retry;
pub mod search;

use async_trait::async_trait;
use leadscore_shared::LeadScoreError;

pub use chat::{ChatClient, ChatClientConfig, ChatRequest};
pub use http::ChatMessage;
pub use retry::{RateLimiter, RetryPolicy};
pub use search::{SearchAnswer, SearchClient, SearchClientConfig};

/// Failure of a remote call, split by whether retrying can help.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// Timeouts, connection resets, rate limits, 5xx.
    #[error("transient remote error: {0}")]
    Transient(String),

    /// Authentication, bad requests, malformed responses.
    #[error("permanent remote error: {0}")]
    Permanent(String),
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<RemoteError> for LeadScoreError {
    fn from(err: RemoteError) -> Self {
        LeadScoreError::Remote(err.to_string())
    }
}

/// A chat-completion backend.
#[async_trait]
pub trait ChatApi: Send + Sync {
    /// Return the text of the first choice.
    async fn complete(&self, request: &ChatRequest) -> Result<String, RemoteError>;
}

/// A web-search answer backend.
#[async_trait]
pub trait SearchApi: Send + Sync {
    /// Model name, used in cache keys.
    fn model(&self) -> &str;

    async fn search(&self, prompt: &str) -> Result<SearchAnswer, RemoteError>;
}
