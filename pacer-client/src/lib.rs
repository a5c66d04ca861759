//! PACER Client - Throttled Request Gateway
//!
//! A [`Throttler`] sits between an application and one REST backend and
//! keeps the application from bursting it:
//! - GET responses are cached for a TTL and identical GETs in flight share one call
//! - At most `max_concurrent` requests run at once; the rest wait in FIFO order
//! - Rate-limited (429) and server (5xx) failures are retried with exponential backoff
//! - Requests can carry a cancellation token and a per-attempt deadline
//!
//! The network is reached through [`pacer_core::Transport`]; [`HttpTransport`]
//! is the reqwest implementation.

mod batch;
mod cache;
mod http;
mod queue;
mod retry;
mod stats;
pub mod telemetry;
mod throttler;

pub use cache::{CacheStats, ResponseCache};
pub use http::{HttpTransport, HttpTransportBuilder};
pub use queue::{JobResult, RequestQueue};
pub use retry::{execute_with_retry, RetryPolicy};
pub use stats::{StatsSnapshot, ThrottleStats};
pub use throttler::Throttler;

pub use pacer_core::{
    CancellationToken, Method, Outcome, PacerConfig, PacerError, PacerResult, RequestError,
    RequestSpec, ThrottleConfig, Transport, TransportResponse,
};
