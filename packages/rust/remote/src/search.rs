//! Web-search answer client (Perplexity-compatible) and its tagged answer type.

use std::time::Duration;

use async_trait::async_trait;
use leadscore_shared::{AppConfig, Credentials, ProfileHint};
use reqwest::Client;
use tracing::{debug, instrument};

use crate::http::{self, ChatMessage, CompletionPayload};
use crate::retry::{RateLimiter, RetryPolicy};
use crate::{RemoteError, SearchApi};

// ---------------------------------------------------------------------------
// SearchAnswer
// ---------------------------------------------------------------------------

/// A web-search answer. No schema is enforced by the provider, so the
/// answer is either a recognized list of profile hints or opaque text.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchAnswer {
    /// The text contained a JSON list of `{site, url, probability, implication}`.
    Parsed { raw: String, hints: Vec<ProfileHint> },
    /// Free text that did not parse.
    Unparsed(String),
}

impl SearchAnswer {
    /// Classify raw answer text.
    pub fn from_text(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        match parse_hints(&raw) {
            Some(hints) => Self::Parsed { raw, hints },
            None => Self::Unparsed(raw),
        }
    }

    /// The answer text as returned by the provider.
    pub fn text(&self) -> &str {
        match self {
            Self::Parsed { raw, .. } => raw,
            Self::Unparsed(raw) => raw,
        }
    }

    pub fn hints(&self) -> &[ProfileHint] {
        match self {
            Self::Parsed { hints, .. } => hints,
            Self::Unparsed(_) => &[],
        }
    }

    /// True only for a zero-length answer. Whitespace still counts as text.
    pub fn is_empty(&self) -> bool {
        self.text().is_empty()
    }
}

/// Find a JSON list of hints in `text`: bare, fenced, wrapped in an object,
/// or embedded in surrounding prose.
fn parse_hints(text: &str) -> Option<Vec<ProfileHint>> {
    let body = strip_code_fence(text.trim());
    if body.is_empty() {
        return None;
    }

    if let Ok(hints) = serde_json::from_str::<Vec<ProfileHint>>(body) {
        return Some(hints);
    }

    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        return map
            .into_iter()
            .find_map(|(_, v)| serde_json::from_value::<Vec<ProfileHint>>(v).ok());
    }

    let start = body.find('[')?;
    let end = body.rfind(']')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Vec<ProfileHint>>(&body[start..=end]).ok()
}

/// Remove a surrounding Markdown code fence (```json ... ```), if any.
fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    rest.trim_end().trim_end_matches("```").trim()
}

// ---------------------------------------------------------------------------
// SearchClient
// ---------------------------------------------------------------------------

/// Settings for [`SearchClient`].
#[derive(Debug, Clone)]
pub struct SearchClientConfig {
    /// Base URL without the `/chat/completions` suffix.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub timeout: Duration,
    pub min_interval: Duration,
    pub retry: RetryPolicy,
}

impl SearchClientConfig {
    /// Build the settings, or `None` when no web-search key is configured.
    pub fn from_app(config: &AppConfig, credentials: &Credentials) -> Option<Self> {
        let api_key = credentials.perplexity_api_key.clone()?;
        Some(Self {
            base_url: config.perplexity.base_url.clone(),
            api_key,
            model: config.perplexity.model.clone(),
            temperature: config.perplexity.temperature,
            timeout: Duration::from_secs(config.perplexity.timeout_secs),
            min_interval: Duration::from_millis(config.perplexity.min_interval_ms),
            retry: RetryPolicy::from(&config.retry),
        })
    }
}

/// Rate-limited, retrying web-search answer client.
pub struct SearchClient {
    client: Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    retry: RetryPolicy,
    limiter: RateLimiter,
}

impl SearchClient {
    pub fn new(config: SearchClientConfig) -> Result<Self, RemoteError> {
        Ok(Self {
            client: http::build_client(config.timeout)?,
            url: http::endpoint(&config.base_url, "chat/completions"),
            api_key: config.api_key,
            model: config.model,
            temperature: config.temperature,
            retry: config.retry,
            limiter: RateLimiter::new(config.min_interval),
        })
    }
}

#[async_trait]
impl SearchApi for SearchClient {
    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model))]
    async fn search(&self, prompt: &str) -> Result<SearchAnswer, RemoteError> {
        let messages = [ChatMessage::user(prompt)];
        let payload = CompletionPayload {
            model: &self.model,
            messages: &messages,
            temperature: self.temperature,
            max_tokens: None,
        };

        let payload = &payload;
        let text = self
            .retry
            .run("web search", move || async move {
                self.limiter.wait().await;
                http::post_completion(&self.client, &self.url, &self.api_key, payload).await
            })
            .await?;

        let answer = SearchAnswer::from_text(text);
        debug!(
            parsed = matches!(answer, SearchAnswer::Parsed { .. }),
            hints = answer.hints().len(),
            "web search answered"
        );
        Ok(answer)
    }
}
