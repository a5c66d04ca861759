//! TTL response cache for GET requests.

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    stored_at: Instant,
}

impl CacheEntry {
    fn is_live(&self, ttl: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) < ttl
    }
}

/// Snapshot of the live cache contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub keys: Vec<String>,
}

/// Cache for parsed response bodies keyed by request cache key.
/// Thread-safe via RwLock.
///
/// Expired entries are treated as absent and evicted lazily: on a `get`
/// that finds them, or when a new key has to make room.
pub struct ResponseCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    /// Maximum number of entries (None = unbounded)
    max_entries: Option<usize>,
}

impl ResponseCache {
    pub fn new(ttl: Duration, max_entries: Option<usize>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries,
        }
    }

    /// Get a cached value if present and not expired.
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        {
            let entries = self.read();
            match entries.get(key) {
                Some(entry) if entry.is_live(self.ttl, now) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        // Expired: drop it so the map does not hold dead entries forever.
        let mut entries = self.write();
        if entries.get(key).is_some_and(|e| !e.is_live(self.ttl, now)) {
            entries.remove(key);
        }
        None
    }

    /// Insert or overwrite a value, resetting its timestamp.
    ///
    /// When a new key arrives at capacity, expired entries are purged first
    /// and then the oldest entry is evicted.
    pub fn put(&self, key: impl Into<String>, value: Value) {
        let key = key.into();
        let now = Instant::now();
        let mut entries = self.write();

        if let Some(max) = self.max_entries {
            if !entries.contains_key(&key) && entries.len() >= max {
                let ttl = self.ttl;
                entries.retain(|_, entry| entry.is_live(ttl, now));
                while entries.len() >= max {
                    let Some(oldest) = entries
                        .iter()
                        .min_by_key(|(_, entry)| entry.stored_at)
                        .map(|(k, _)| k.clone())
                    else {
                        break;
                    };
                    tracing::trace!(key = %oldest, "Evicting oldest cache entry");
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: now,
            },
        );
    }

    /// Clear all cached entries.
    pub fn clear(&self) {
        self.write().clear();
    }

    /// Live entries only; keys sorted.
    pub fn stats(&self) -> CacheStats {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .read()
            .iter()
            .filter(|(_, entry)| entry.is_live(self.ttl, now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        CacheStats {
            size: keys.len(),
            keys,
        }
    }

    /// Number of stored entries, including expired ones not yet evicted.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("ttl", &self.ttl)
            .field("max_entries", &self.max_entries)
            .field("current_size", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn test_poisoned_lock_keeps_working() {
        let cache = ResponseCache::new(TTL, None);
        cache.put("GET /api/services", json!(1));
        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _entries = cache.entries.write().unwrap();
            panic!("writer panicked");
        }));
        assert!(poisoned.is_err());
        assert!(cache.entries.is_poisoned());

        assert_eq!(cache.get("GET /api/services"), Some(json!(1)));
        cache.put("GET /api/providers", json!(2));
        assert_eq!(cache.stats().size, 2);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_returns_fresh_value() {
        let cache = ResponseCache::new(TTL, None);
        cache.put("GET /api/services", json!([1, 2]));
        assert_eq!(cache.get("GET /api/services"), Some(json!([1, 2])));
        assert_eq!(cache.get("GET /api/providers"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_at_ttl() {
        let cache = ResponseCache::new(TTL, None);
        cache.put("k", json!(1));

        tokio::time::advance(TTL - Duration::from_millis(1)).await;
        assert_eq!(cache.get("k"), Some(json!(1)));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty(), "expired entry should be dropped on read");
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_overwrites_and_resets_timestamp() {
        let cache = ResponseCache::new(TTL, None);
        cache.put("k", json!("old"));
        tokio::time::advance(Duration::from_secs(50)).await;
        cache.put("k", json!("new"));
        tokio::time::advance(Duration::from_secs(50)).await;
        assert_eq!(cache.get("k"), Some(json!("new")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_removes_everything() {
        let cache = ResponseCache::new(TTL, None);
        cache.put("a", json!(1));
        cache.put("b", json!(2));
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stats_report_live_keys_sorted() {
        let cache = ResponseCache::new(TTL, None);
        cache.put("b", json!(1));
        tokio::time::advance(Duration::from_secs(30)).await;
        cache.put("a", json!(2));
        tokio::time::advance(Duration::from_secs(31)).await;

        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.keys, vec!["a".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_evicts_oldest() {
        let cache = ResponseCache::new(TTL, Some(2));
        cache.put("first", json!(1));
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.put("second", json!(2));
        tokio::time::advance(Duration::from_millis(10)).await;
        cache.put("third", json!(3));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("first"), None);
        assert_eq!(cache.get("second"), Some(json!(2)));
        assert_eq!(cache.get("third"), Some(json!(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capacity_prefers_purging_expired() {
        let cache = ResponseCache::new(Duration::from_secs(1), Some(2));
        cache.put("stale", json!(0));
        tokio::time::advance(Duration::from_millis(900)).await;
        cache.put("fresh", json!(1));
        tokio::time::advance(Duration::from_millis(200)).await;
        cache.put("newest", json!(2));

        assert_eq!(cache.get("fresh"), Some(json!(1)));
        assert_eq!(cache.get("newest"), Some(json!(2)));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overwrite_at_capacity_does_not_evict() {
        let cache = ResponseCache::new(TTL, Some(2));
        cache.put("a", json!(1));
        cache.put("b", json!(2));
        cache.put("a", json!(3));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("b"), Some(json!(2)));
        assert_eq!(cache.get("a"), Some(json!(3)));
    }
}
