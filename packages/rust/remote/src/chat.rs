//! Chat-completion client (OpenAI-compatible).

use std::time::Duration;

use async_trait::async_trait;
use leadscore_shared::{AppConfig, Credentials};
use reqwest::Client;
use tracing::instrument;

use crate::http::{self, ChatMessage, CompletionPayload};
use crate::retry::{RateLimiter, RetryPolicy};
use crate::{ChatApi, RemoteError};

/// One chat-completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    /// Sampling temperature in `0..=1`.
    pub temperature: f32,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            temperature: 0.7,
            messages,
            max_tokens: None,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// All message contents concatenated, used as the cache key input.
    pub fn prompt_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}:{}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Settings for [`ChatClient`].
#[derive(Debug, Clone)]
pub struct ChatClientConfig {
    /// Base URL without the `/chat/completions` suffix.
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub min_interval: Duration,
    pub retry: RetryPolicy,
}

impl ChatClientConfig {
    pub fn from_app(config: &AppConfig, credentials: &Credentials) -> Self {
        Self {
            base_url: config.openai.base_url.clone(),
            api_key: credentials.openai_api_key.clone(),
            timeout: Duration::from_secs(config.openai.timeout_secs),
            min_interval: Duration::from_millis(config.openai.min_interval_ms),
            retry: RetryPolicy::from(&config.retry),
        }
    }
}

/// Rate-limited, retrying chat-completion client.
pub struct ChatClient {
    client: Client,
    url: String,
    api_key: String,
    retry: RetryPolicy,
    limiter: RateLimiter,
}

impl ChatClient {
    pub fn new(config: ChatClientConfig) -> Result<Self, RemoteError> {
        Ok(Self {
            client: http::build_client(config.timeout)?,
            url: http::endpoint(&config.base_url, "chat/completions"),
            api_key: config.api_key,
            retry: config.retry,
            limiter: RateLimiter::new(config.min_interval),
        })
    }
}

#[async_trait]
impl ChatApi for ChatClient {
    #[instrument(skip_all, fields(model = %request.model, temperature = request.temperature))]
    async fn complete(&self, request: &ChatRequest) -> Result<String, RemoteError> {
        let payload = CompletionPayload {
            model: &request.model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let payload = &payload;
        self.retry
            .run("chat completion", move || async move {
                self.limiter.wait().await;
                http::post_completion(&self.client, &self.url, &self.api_key, payload).await
            })
            .await
    }
}
