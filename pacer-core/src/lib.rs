//! PACER Core - Shared Types
//!
//! Request descriptions, the error taxonomy, configuration, and the transport
//! seam. The throttler itself lives in pacer-client; lifecycle adapters live
//! in pacer-hooks. This crate contains no scheduling logic.

mod config;
mod error;
mod outcome;
mod request;
mod transport;

pub use config::{HookConfig, PacerConfig, ThrottleConfig};
pub use error::{ConfigError, PacerError, PacerResult, RequestError};
pub use outcome::Outcome;
pub use request::{new_request_id, Method, MethodParseError, RequestId, RequestSpec};
pub use transport::{parse_retry_after, Transport, TransportResponse, MAX_RETRY_AFTER};

// Re-exported so downstream crates share one token type.
pub use tokio_util::sync::CancellationToken;
