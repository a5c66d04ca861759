//! Exponential backoff around a single unit of work.
//!
//! The engine knows nothing about the queue. It runs one operation until it
//! succeeds, fails terminally, runs out of attempts, or is cancelled.

use pacer_core::{CancellationToken, RequestError, ThrottleConfig};
use std::future::Future;
use std::time::Duration;

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles for each attempt after
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &ThrottleConfig) -> Self {
        Self::new(config.retry_attempts, config.retry_delay())
    }

    /// Backoff after failed attempt `attempt` (1-based): `base × 2^(attempt-1)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }

    /// Actual wait: the backoff, stretched to the server's `Retry-After` if longer.
    pub fn delay_after(&self, attempt: u32, err: &RequestError) -> Duration {
        let backoff = self.backoff(attempt);
        match err.retry_after() {
            Some(server) if server > backoff => server,
            _ => backoff,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&ThrottleConfig::default())
    }
}

/// Run `op` with retries.
///
/// `op` receives the 1-based attempt number. Retryable failures (429, 5xx)
/// are retried while attempts remain; anything else, or the last failure,
/// is returned unchanged. Cancellation is checked before every attempt and
/// interrupts backoff sleeps.
pub async fn execute_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: Option<&CancellationToken>,
    url: &str,
    mut op: F,
) -> Result<T, RequestError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, RequestError>>,
{
    let mut attempt = 1;
    loop {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(RequestError::Cancelled {
                url: url.to_string(),
            });
        }

        let err = match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if !err.is_retryable() || attempt >= policy.max_attempts {
            tracing::debug!(url, attempt, error = %err, "Giving up on request");
            return Err(err);
        }

        let delay = policy.delay_after(attempt, &err);
        tracing::warn!(
            url,
            attempt,
            status = ?err.status(),
            delay_ms = delay.as_millis() as u64,
            "Retryable failure, backing off"
        );

        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => {
                        return Err(RequestError::Cancelled { url: url.to_string() });
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }
        attempt += 1;
    }
}
