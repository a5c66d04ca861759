//! Request counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Tracks what the throttler did with each request.
/// Thread-safe via atomic operations.
#[derive(Default)]
pub struct ThrottleStats {
    /// Transport calls, one per attempt
    network_attempts: AtomicU64,
    cache_hits: AtomicU64,
    /// Callers that joined an identical request already in flight
    coalesced: AtomicU64,
    retries: AtomicU64,
    /// Requests that settled with an error after all attempts
    failures: AtomicU64,
}

/// Point-in-time copy of [`ThrottleStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub network_attempts: u64,
    pub cache_hits: u64,
    pub coalesced: u64,
    pub retries: u64,
    pub failures: u64,
}

impl ThrottleStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt(&self) {
        self.network_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            network_attempts: self.network_attempts.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.network_attempts.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.coalesced.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for ThrottleStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ThrottleStats").field(&self.snapshot()).finish()
    }
}
