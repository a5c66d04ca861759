//! Error types for PACER operations

use std::time::Duration;
use thiserror::Error;

/// Errors produced while executing a single outbound request.
///
/// Every variant is `Clone` so that one settled result can be handed to
/// several callers attached to the same in-flight request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Rate limited on {url}, retry after {retry_after_ms:?}ms")]
    RateLimited {
        url: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Request to {url} failed with status {status}: {message}")]
    HttpStatus {
        url: String,
        status: u16,
        message: String,
    },

    #[error("Network error for {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("Invalid response from {url}: {reason}")]
    InvalidResponse { url: String, reason: String },

    #[error("Request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Request to {url} was cancelled")]
    Cancelled { url: String },
}

impl RequestError {
    /// Rate limiting (429) and server errors (5xx) are transient; everything
    /// else is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::HttpStatus { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }

    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::RateLimited { .. } => Some(429),
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Server-suggested delay from a `Retry-After` header.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited {
                retry_after_ms: Some(ms),
                ..
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }

    /// URL of the request that failed.
    pub fn url(&self) -> &str {
        match self {
            Self::RateLimited { url, .. }
            | Self::HttpStatus { url, .. }
            | Self::Network { url, .. }
            | Self::InvalidResponse { url, .. }
            | Self::Timeout { url, .. }
            | Self::Cancelled { url } => url,
        }
    }

    /// Short message suitable for inline display in a UI.
    pub fn user_message(&self) -> String {
        match self {
            Self::HttpStatus { message, .. } => message.clone(),
            Self::RateLimited { .. } => "Too many requests, please try again shortly".to_string(),
            Self::Network { reason, .. } => reason.clone(),
            Self::InvalidResponse { reason, .. } => reason.clone(),
            Self::Timeout { .. } => "Request timed out".to_string(),
            Self::Cancelled { .. } => "Request cancelled".to_string(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    ReadFailed { path: String, reason: String },

    #[error("Failed to parse config: {reason}")]
    ParseFailed { reason: String },
}

/// Master error type for all PACER errors.
#[derive(Debug, Clone, Error)]
pub enum PacerError {
    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl PacerError {
    /// Message shown to end users; request errors expose the server's own text.
    pub fn user_message(&self) -> String {
        match self {
            Self::Request(err) => err.user_message(),
            Self::Config(err) => err.to_string(),
        }
    }

    /// The underlying request error, if this is one.
    pub fn as_request(&self) -> Option<&RequestError> {
        match self {
            Self::Request(err) => Some(err),
            Self::Config(_) => None,
        }
    }
}

/// Result type alias for PACER operations.
pub type PacerResult<T> = Result<T, PacerError>;

// =============================================================================
// TESTS
// =============================================================================
