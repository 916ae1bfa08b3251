//! HTTP plumbing shared by the chat and web-search clients.
//!
//! Both providers speak the OpenAI `chat/completions` wire format, so the
//! request, the response envelope and the error classification live here.

use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::RemoteError;

/// User-Agent string for outbound API requests.
const USER_AGENT: &str = concat!("leadscore/", env!("CARGO_PKG_VERSION"));

/// Longest slice of an error body kept in error messages.
const MAX_ERROR_BODY: usize = 300;

/// Build a client with the given request timeout.
pub(crate) fn build_client(timeout: Duration) -> Result<Client, RemoteError> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| RemoteError::Permanent(format!("failed to build HTTP client: {e}")))
}

/// `{role, content}` chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CompletionPayload<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// POST a completion payload and return the first choice's text.
pub(crate) async fn post_completion(
    client: &Client,
    url: &str,
    api_key: &str,
    payload: &CompletionPayload<'_>,
) -> Result<String, RemoteError> {
    debug!(%url, model = payload.model, messages = payload.messages.len(), "sending completion");

    let response = client
        .post(url)
        .bearer_auth(api_key)
        .json(payload)
        .send()
        .await
        .map_err(classify_send_error)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(status, &body));
    }

    let body: CompletionResponse = response
        .json()
        .await
        .map_err(|e| RemoteError::Permanent(format!("malformed completion response: {e}")))?;

    body.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| RemoteError::Permanent("completion response has no message content".into()))
}

/// Network-level failures. Everything except a broken request is worth retrying.
pub(crate) fn classify_send_error(err: reqwest::Error) -> RemoteError {
    if err.is_builder() {
        RemoteError::Permanent(format!("invalid request: {err}"))
    } else {
        RemoteError::Transient(format!("request failed: {err}"))
    }
}

/// Non-success HTTP statuses: rate limits, timeouts and 5xx are transient.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> RemoteError {
    let snippet: String = body.chars().take(MAX_ERROR_BODY).collect();
    let message = format!("HTTP {status}: {}", snippet.trim());

    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
    {
        RemoteError::Transient(message)
    } else {
        RemoteError::Permanent(message)
    }
}

/// Join a base URL and a path without doubling slashes.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
