//! Retry policy and request pacing for remote calls.

use std::future::Future;
use std::time::Duration;

use leadscore_shared::RetryConfig;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::RemoteError;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Bounded retry with a fixed delay. Only [`RemoteError::Transient`] is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never less than one.
    pub max_attempts: u32,
    /// Pause between two attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delay: Duration::from_secs(2),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.delay_ms))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out.
    ///
    /// The error of the last attempt is returned unchanged.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match call().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "remote call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_retryable() && attempt < max_attempts => {
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        error = %err,
                        "transient remote failure, retrying"
                    );
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Enforces a minimum interval between requests issued through one client.
///
/// Shared by every worker holding the client, so the interval applies to the
/// client as a whole rather than per task.
#[derive(Debug)]
pub struct RateLimiter {
    last_request: Mutex<Option<Instant>>,
    min_interval: Duration,
}

impl RateLimiter {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            last_request: Mutex::new(None),
            min_interval,
        }
    }

    /// Wait until the next request may go out, then claim the slot.
    pub async fn wait(&self) {
        if self.min_interval.is_zero() {
            return;
        }

        let mut last = self.last_request.lock().await;
        if let Some(last_time) = *last {
            let elapsed = last_time.elapsed();
            if elapsed < self.min_interval {
                let wait_time = self.min_interval - elapsed;
                debug!(?wait_time, "rate limiting");
                tokio::time::sleep(wait_time).await;
            }
        }
        *last = Some(Instant::now());
    }
}
