//! Transport seam between the throttler and the network.
//!
//! The throttler only ever talks to a [`Transport`]. The reqwest-backed
//! implementation lives in pacer-client; tests substitute a scripted one.

use crate::{RequestError, RequestSpec};
use async_trait::async_trait;
use std::time::Duration;

/// Raw response as seen by the throttler, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// Parsed `Retry-After` header, if the server sent one.
    pub retry_after: Option<Duration>,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends a single request attempt.
///
/// Implementations must be thread-safe (Send + Sync). A returned `Err` means
/// no HTTP response was obtained at all (connection refused, DNS, TLS...);
/// HTTP error statuses are returned as `Ok` and classified by the caller.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &RequestSpec) -> Result<TransportResponse, RequestError>;
}

/// Longest server-requested wait honoured; larger `Retry-After` values are clamped.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Parse a `Retry-After` value given in seconds (fractional seconds allowed).
///
/// HTTP-date values are not supported and yield `None`. Values above
/// [`MAX_RETRY_AFTER`] are clamped to it.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds = value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)?;
    let delay = Duration::try_from_secs_f64(seconds).unwrap_or(MAX_RETRY_AFTER);
    Some(delay.min(MAX_RETRY_AFTER))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
        assert_eq!(parse_retry_after(" 1.5 "), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_parse_retry_after_rejects_garbage() {
        assert_eq!(parse_retry_after("Wed, 21 Oct 2015 07:28:00 GMT"), None);
        assert_eq!(parse_retry_after("-3"), None);
        assert_eq!(parse_retry_after(""), None);
    }

    #[test]
    fn test_parse_retry_after_clamps_huge_values() {
        assert_eq!(parse_retry_after("1e30"), Some(MAX_RETRY_AFTER));
        assert_eq!(parse_retry_after("86400"), Some(MAX_RETRY_AFTER));
        assert_eq!(parse_retry_after("3600"), Some(MAX_RETRY_AFTER));
        assert_eq!(parse_retry_after("inf"), None);
    }

    #[test]
    fn test_transport_response_success_range() {
        assert!(TransportResponse::new(200, "{}").is_success());
        assert!(TransportResponse::new(204, "").is_success());
        assert!(!TransportResponse::new(301, "").is_success());
        assert!(!TransportResponse::new(429, "").is_success());
    }
}
