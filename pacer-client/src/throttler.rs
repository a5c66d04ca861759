//! Throttled fetch facade.
//!
//! `Throttler` ties the pieces together: cache lookup for GETs, coalescing of
//! identical GETs already in flight, the FIFO queue, and the retry engine.

use crate::cache::{CacheStats, ResponseCache};
use crate::http::HttpTransport;
use crate::queue::RequestQueue;
use crate::retry::{execute_with_retry, RetryPolicy};
use crate::stats::{StatsSnapshot, ThrottleStats};
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use pacer_core::{
    PacerError, PacerResult, RequestError, RequestSpec, ThrottleConfig, Transport,
    TransportResponse,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

type SharedFetch = Shared<BoxFuture<'static, Result<Value, RequestError>>>;

struct ThrottlerInner {
    config: ThrottleConfig,
    transport: Arc<dyn Transport>,
    cache: ResponseCache,
    queue: RequestQueue,
    policy: RetryPolicy,
    /// GETs currently queued or running, by cache key
    in_flight: Mutex<HashMap<String, SharedFetch>>,
    stats: ThrottleStats,
}

/// One bounded-concurrency gateway to a backend.
///
/// Construct one per backend and share it by cloning; clones share the
/// cache, the queue and the counters.
#[derive(Clone)]
pub struct Throttler {
    inner: Arc<ThrottlerInner>,
}

impl Throttler {
    /// Build a throttler over any transport. Fails if `config` is invalid.
    pub fn new(config: ThrottleConfig, transport: Arc<dyn Transport>) -> PacerResult<Self> {
        config.validate()?;

        let cache = ResponseCache::new(config.cache_ttl(), config.cache_max_entries);
        let queue = RequestQueue::from_config(&config);
        let policy = RetryPolicy::from_config(&config);

        tracing::debug!(
            max_concurrent = config.max_concurrent,
            delay_between_requests_ms = config.delay_between_requests_ms,
            retry_attempts = config.retry_attempts,
            cache_ttl_ms = config.cache_ttl_ms,
            "Throttler created"
        );

        Ok(Self {
            inner: Arc::new(ThrottlerInner {
                config,
                transport,
                cache,
                queue,
                policy,
                in_flight: Mutex::new(HashMap::new()),
                stats: ThrottleStats::new(),
            }),
        })
    }

    pub fn with_transport<T: Transport + 'static>(
        config: ThrottleConfig,
        transport: T,
    ) -> PacerResult<Self> {
        Self::new(config, Arc::new(transport))
    }

    /// Throttler over reqwest, resolving relative URLs against `base_url`.
    pub fn with_http(config: ThrottleConfig, base_url: impl Into<String>) -> PacerResult<Self> {
        Self::new(config, Arc::new(HttpTransport::new(base_url)?))
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.inner.config
    }

    /// Fetch and parse a JSON response.
    ///
    /// GETs are answered from the cache while fresh and share a single
    /// network call with identical GETs already in flight. Everything else
    /// goes through the queue and the retry engine. Errors are returned as
    /// they were produced; a retry-exhausted request yields its last error.
    pub async fn fetch(&self, request: RequestSpec) -> PacerResult<Value> {
        self.fetch_value(request).await.map_err(PacerError::from)
    }

    /// Fetch and deserialize into `T`.
    pub async fn fetch_json<T: DeserializeOwned>(&self, request: RequestSpec) -> PacerResult<T> {
        let url = request.url.clone();
        let value = self.fetch(request).await?;
        serde_json::from_value(value).map_err(|e| {
            PacerError::from(RequestError::InvalidResponse {
                url,
                reason: e.to_string(),
            })
        })
    }

    /// Plain GET.
    pub async fn get(&self, url: impl Into<String>) -> PacerResult<Value> {
        self.fetch(RequestSpec::get(url)).await
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
        tracing::debug!("Response cache cleared");
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    pub fn active_requests(&self) -> usize {
        self.inner.queue.active()
    }

    pub fn pending_requests(&self) -> usize {
        self.inner.queue.pending()
    }

    async fn fetch_value(&self, request: RequestSpec) -> Result<Value, RequestError> {
        let key = request.cache_key();

        if request.is_cacheable() {
            if let Some(value) = self.inner.cache.get(&key) {
                self.inner.stats.record_cache_hit();
                tracing::trace!(key = %key, "Cache hit");
                return Ok(value);
            }
            // A caller-owned cancellation token must not cancel other callers.
            if self.inner.config.coalesce_in_flight && request.cancel.is_none() {
                return self.fetch_coalesced(key, request).await;
            }
        }

        self.dispatch(key, request, None).await
    }

    async fn fetch_coalesced(&self, key: String, request: RequestSpec) -> Result<Value, RequestError> {
        let shared = {
            let mut in_flight = lock(&self.inner.in_flight);
            match in_flight.get(&key) {
                Some(existing) => {
                    self.inner.stats.record_coalesced();
                    tracing::debug!(key = %key, "Joining in-flight request");
                    existing.clone()
                }
                None => {
                    let slot = InFlightSlot {
                        inner: Arc::clone(&self.inner),
                        key: key.clone(),
                    };
                    let shared = self
                        .dispatch(key.clone(), request, Some(slot))
                        .boxed()
                        .shared();
                    in_flight.insert(key, shared.clone());
                    shared
                }
            }
        };
        shared.await
    }

    fn dispatch(
        &self,
        key: String,
        request: RequestSpec,
        slot: Option<InFlightSlot>,
    ) -> impl Future<Output = Result<Value, RequestError>> + Send + 'static {
        let inner = Arc::clone(&self.inner);
        let url = request.url.clone();
        let cancel = request.cancel.clone();
        self.inner.queue.enqueue(url, cancel, move || async move {
            let _slot = slot;
            inner.execute(&key, &request).await
        })
    }
}

impl std::fmt::Debug for Throttler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttler")
            .field("config", &self.inner.config)
            .field("cache", &self.inner.cache)
            .field("queue", &self.inner.queue)
            .field("stats", &self.inner.stats)
            .finish_non_exhaustive()
    }
}

impl ThrottlerInner {
    /// One admitted request: attempts under the retry policy.
    async fn execute(&self, key: &str, request: &RequestSpec) -> Result<Value, RequestError> {
        let result = execute_with_retry(
            &self.policy,
            request.cancel.as_ref(),
            &request.url,
            |attempt| {
                if attempt > 1 {
                    self.stats.record_retry();
                }
                self.attempt(key, request, attempt)
            },
        )
        .await;

        if let Err(err) = &result {
            self.stats.record_failure();
            tracing::warn!(
                method = %request.method,
                url = %request.url,
                error = %err,
                "Request failed"
            );
        }
        result
    }

    async fn attempt(
        &self,
        key: &str,
        request: &RequestSpec,
        attempt: u32,
    ) -> Result<Value, RequestError> {
        self.stats.record_attempt();
        tracing::debug!(method = %request.method, url = %request.url, attempt, "Sending request");

        let response = self.send(request).await?;
        let value = decode_response(&request.url, response)?;
        if request.is_cacheable() {
            self.cache.put(key, value.clone());
        }
        Ok(value)
    }

    /// Transport call bounded by the attempt deadline and the caller's token.
    async fn send(&self, request: &RequestSpec) -> Result<TransportResponse, RequestError> {
        let deadline = request.timeout.or(self.config.request_timeout());
        let send = with_deadline(deadline, &request.url, self.transport.send(request));

        match &request.cancel {
            Some(token) => tokio::select! {
                biased;
                _ = token.cancelled() => Err(RequestError::Cancelled { url: request.url.clone() }),
                result = send => result,
            },
            None => send.await,
        }
    }
}

async fn with_deadline<F>(
    deadline: Option<Duration>,
    url: &str,
    send: F,
) -> Result<TransportResponse, RequestError>
where
    F: Future<Output = Result<TransportResponse, RequestError>>,
{
    match deadline {
        Some(limit) => tokio::time::timeout(limit, send)
            .await
            .map_err(|_| RequestError::Timeout {
                url: url.to_string(),
                timeout_ms: limit.as_millis() as u64,
            })?,
        None => send.await,
    }
}

/// Classify a raw response: 429 is rate limiting, other non-2xx statuses carry
/// the server's message, 2xx bodies are parsed as JSON (empty means `null`).
fn decode_response(url: &str, response: TransportResponse) -> Result<Value, RequestError> {
    if response.status == 429 {
        return Err(RequestError::RateLimited {
            url: url.to_string(),
            retry_after_ms: response.retry_after.map(|d| d.as_millis() as u64),
        });
    }

    if !response.is_success() {
        let message = error_message(&response.body)
            .unwrap_or_else(|| format!("HTTP error! status: {}", response.status));
        return Err(RequestError::HttpStatus {
            url: url.to_string(),
            status: response.status,
            message,
        });
    }

    if response.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(&response.body).map_err(|e| RequestError::InvalidResponse {
        url: url.to_string(),
        reason: e.to_string(),
    })
}

/// `message` or `error` string from a JSON error body.
fn error_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|field| value.get(field).and_then(Value::as_str))
        .filter(|message| !message.is_empty())
        .map(str::to_string)
}

/// Removes a coalesced request from the in-flight map when its job ends,
/// whether it finished, failed or panicked.
struct InFlightSlot {
    inner: Arc<ThrottlerInner>,
    key: String,
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        lock(&self.inner.in_flight).remove(&self.key);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
