//! PACER Test Utilities
//!
//! Centralized test infrastructure for the PACER workspace:
//! - Scripted mock transport with call recording and gating
//! - Proptest generators for requests and statuses
//! - Test fixtures for common responses and configurations
//! - Custom assertions for PACER-specific validation

pub use pacer_core::{
    Method, Outcome, PacerConfig, PacerError, PacerResult, RequestError, RequestSpec,
    ThrottleConfig, Transport, TransportResponse,
};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

// ============================================================================
// GATE
// ============================================================================

/// A latch that holds responses until the test releases them, one per permit.
#[derive(Debug, Clone)]
pub struct Gate {
    permits: Arc<Semaphore>,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            permits: Arc::new(Semaphore::new(0)),
        }
    }

    /// Let `n` waiting responses through, in arrival order.
    pub fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }

    /// Let every current and future response through.
    pub fn open(&self) {
        self.permits.close();
    }

    async fn pass(&self) {
        // A closed semaphore means the gate is open.
        if let Ok(permit) = self.permits.acquire().await {
            permit.forget();
        }
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// MOCK TRANSPORT
// ============================================================================

/// One scripted reply.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub body: Vec<u8>,
    pub retry_after: Option<Duration>,
    pub latency: Option<Duration>,
    pub gate: Option<Gate>,
    /// When set, the transport fails without producing an HTTP response.
    pub network_error: Option<String>,
}

impl MockResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            retry_after: None,
            latency: None,
            gate: None,
            network_error: None,
        }
    }

    pub fn json(status: u16, value: Value) -> Self {
        Self::new(status, value.to_string())
    }

    pub fn network_error(reason: impl Into<String>) -> Self {
        Self {
            network_error: Some(reason.into()),
            ..Self::new(0, Vec::new())
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn gated(mut self, gate: &Gate) -> Self {
        self.gate = Some(gate.clone());
        self
    }
}

/// A request observed by the mock transport.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub url: String,
    pub body: Option<Value>,
    pub bearer_token: Option<String>,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct Route {
    scripted: VecDeque<MockResponse>,
    fallback: Option<MockResponse>,
}

#[derive(Debug, Default)]
struct MockInner {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<RecordedCall>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Scripted transport for tests.
///
/// Each URL has a queue of one-shot responses consumed in order, then an
/// optional fallback that answers every further call. Unrouted URLs get a
/// 404 with a JSON error body.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every call to `url` with `response` once scripted replies run out.
    pub fn on(&self, url: impl Into<String>, response: MockResponse) -> &Self {
        lock(&self.inner.routes)
            .entry(url.into())
            .or_default()
            .fallback = Some(response);
        self
    }

    /// Queue a one-shot reply for `url`.
    pub fn enqueue(&self, url: impl Into<String>, response: MockResponse) -> &Self {
        lock(&self.inner.routes)
            .entry(url.into())
            .or_default()
            .scripted
            .push_back(response);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.inner.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.inner.calls).len()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        lock(&self.inner.calls).iter().filter(|c| c.url == url).count()
    }

    /// URLs in the order their calls started.
    pub fn call_order(&self) -> Vec<String> {
        lock(&self.inner.calls).iter().map(|c| c.url.clone()).collect()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.inner.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_response(&self, url: &str) -> MockResponse {
        let mut routes = lock(&self.inner.routes);
        match routes.get_mut(url) {
            Some(route) => route
                .scripted
                .pop_front()
                .or_else(|| route.fallback.clone())
                .unwrap_or_else(not_found),
            None => not_found(),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &RequestSpec) -> Result<TransportResponse, RequestError> {
        lock(&self.inner.calls).push(RecordedCall {
            method: request.method,
            url: request.url.clone(),
            body: request.body.clone(),
            bearer_token: request.bearer_token.clone(),
            at: Instant::now(),
        });

        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.inner.in_flight);

        let response = self.next_response(&request.url);
        if let Some(latency) = response.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(gate) = &response.gate {
            gate.pass().await;
        }

        if let Some(reason) = response.network_error {
            return Err(RequestError::Network {
                url: request.url.clone(),
                reason,
            });
        }

        Ok(TransportResponse {
            status: response.status,
            retry_after: response.retry_after,
            body: response.body,
        })
    }
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn not_found() -> MockResponse {
    MockResponse::json(404, serde_json::json!({ "message": "Not found" }))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Let every spawned task run until it blocks.
///
/// Under a paused clock this returns once the runtime is otherwise idle, so
/// it also lets due timers fire. It advances virtual time by one millisecond.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(1)).await;
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating PACER request types.

    use super::*;
    use proptest::prelude::*;

    pub fn arb_method() -> impl Strategy<Value = Method> {
        prop_oneof![
            Just(Method::Get),
            Just(Method::Post),
            Just(Method::Put),
            Just(Method::Patch),
            Just(Method::Delete),
        ]
    }

    /// Paths shaped like the marketplace REST API.
    pub fn arb_api_path() -> impl Strategy<Value = String> {
        (
            prop_oneof![
                Just("services"),
                Just("providers"),
                Just("bookings"),
                Just("reviews"),
                Just("categories"),
            ],
            proptest::option::of(1u32..10_000),
        )
            .prop_map(|(resource, id)| match id {
                Some(id) => format!("/api/{}/{}", resource, id),
                None => format!("/api/{}", resource),
            })
    }

    pub fn arb_json_body() -> impl Strategy<Value = Value> {
        ("[a-z]{1,8}", any::<i64>()).prop_map(|(key, value)| {
            let mut map = serde_json::Map::new();
            map.insert(key, Value::from(value));
            Value::Object(map)
        })
    }

    pub fn arb_request_spec() -> impl Strategy<Value = RequestSpec> {
        (arb_method(), arb_api_path(), proptest::option::of(arb_json_body())).prop_map(
            |(method, url, body)| {
                let spec = RequestSpec::new(method, url);
                match body {
                    Some(body) if method != Method::Get => spec.with_body(body),
                    _ => spec,
                }
            },
        )
    }

    /// 429 or a 5xx status.
    pub fn arb_retryable_status() -> impl Strategy<Value = u16> {
        prop_oneof![Just(429u16), 500u16..600]
    }

    /// 4xx other than 429.
    pub fn arb_terminal_status() -> impl Strategy<Value = u16> {
        (400u16..500).prop_filter("429 is retryable", |s| *s != 429)
    }

    pub fn arb_throttle_config() -> impl Strategy<Value = ThrottleConfig> {
        (1usize..8, 0u64..500, 1u32..6, 1u64..2000, 1u64..600_000).prop_map(
            |(max_concurrent, delay, attempts, retry_delay, ttl)| ThrottleConfig {
                max_concurrent,
                delay_between_requests_ms: delay,
                retry_attempts: attempts,
                retry_delay_ms: retry_delay,
                cache_ttl_ms: ttl,
                ..ThrottleConfig::default()
            },
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built responses and configurations.

    use super::*;
    use serde_json::json;

    pub fn ok_json(value: Value) -> MockResponse {
        MockResponse::json(200, value)
    }

    pub fn status(code: u16) -> MockResponse {
        MockResponse::json(code, json!({ "message": format!("status {}", code) }))
    }

    pub fn error_message(code: u16, message: &str) -> MockResponse {
        MockResponse::json(code, json!({ "message": message }))
    }

    pub fn rate_limited() -> MockResponse {
        MockResponse::new(429, "")
    }

    pub fn rate_limited_for(retry_after: Duration) -> MockResponse {
        rate_limited().with_retry_after(retry_after)
    }

    pub fn service_list() -> Value {
        json!([
            { "id": 1, "name": "Deep cleaning", "price": 120 },
            { "id": 2, "name": "Plumbing", "price": 90 }
        ])
    }

    /// Defaults with no inter-request pause, for tests that count admissions.
    pub fn immediate_config() -> ThrottleConfig {
        ThrottleConfig {
            delay_between_requests_ms: 0,
            ..ThrottleConfig::default()
        }
    }

    /// Single-slot queue with fast retries.
    pub fn serial_config() -> ThrottleConfig {
        ThrottleConfig {
            max_concurrent: 1,
            delay_between_requests_ms: 0,
            retry_delay_ms: 10,
            ..ThrottleConfig::default()
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for PACER-specific validation.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &PacerResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_err<T: std::fmt::Debug>(result: &PacerResult<T>) {
        assert!(result.is_err(), "Expected Err, got Ok: {:?}", result);
    }

    /// Assert that a PacerResult failed with the given HTTP status.
    #[track_caller]
    pub fn assert_http_status<T: std::fmt::Debug>(result: &PacerResult<T>, expected: u16) {
        match result {
            Err(PacerError::Request(err)) => {
                assert_eq!(err.status(), Some(expected), "Wrong status in {:?}", err)
            }
            other => panic!("Expected request error with status {}, got: {:?}", expected, other),
        }
    }

    #[track_caller]
    pub fn assert_timeout<T: std::fmt::Debug>(result: &PacerResult<T>) {
        match result {
            Err(PacerError::Request(RequestError::Timeout { .. })) => {}
            other => panic!("Expected Timeout error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_cancelled<T: std::fmt::Debug>(result: &PacerResult<T>) {
        match result {
            Err(PacerError::Request(RequestError::Cancelled { .. })) => {}
            other => panic!("Expected Cancelled error, got: {:?}", other),
        }
    }

    /// Assert `actual` lies in `[expected, expected + tolerance]`.
    #[track_caller]
    pub fn assert_duration_near(actual: Duration, expected: Duration, tolerance: Duration) {
        assert!(
            actual >= expected && actual <= expected + tolerance,
            "Expected {:?} (+{:?}), got {:?}",
            expected,
            tolerance,
            actual
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================
