//! Generic TTL-bounded cache with LRU eviction (C1).
//!
//! Grounded on `backend/agent/services/cache.py`'s `TTLCache`: same
//! eviction rule (`(hits asc, created_at desc)`), same opportunistic
//! cleanup-on-access policy, same stats shape. The Python version takes a
//! `threading.Lock`; this one takes a `tokio::sync::Mutex` and, per spec
//! §4.1, releases it before running a cache-miss factory so unrelated keys
//! are never blocked by one slow fill.

use std::collections::HashMap;
use std::future::Future;

use chrono::Utc;
use review_types::CacheEntry;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub total_entries: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64 * 100.0
        }
    }
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    stats: CacheStats,
    last_cleanup: chrono::DateTime<Utc>,
}

pub struct TtlCache<V> {
    inner: Mutex<Inner<V>>,
    default_ttl_seconds: i64,
    max_entries: usize,
    cleanup_interval_seconds: i64,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(default_ttl_seconds: i64, max_entries: usize, cleanup_interval_seconds: i64) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                stats: CacheStats::default(),
                last_cleanup: Utc::now(),
            }),
            default_ttl_seconds,
            max_entries,
            cleanup_interval_seconds,
        }
    }

    /// Hash an arbitrary key payload the way the original's
    /// `_generate_key` does (sha256, truncated), for callers that want a
    /// bounded-length key derived from structured data rather than using a
    /// raw string key directly.
    pub fn hash_key(parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(parts.join(":").as_bytes());
        let digest = hasher.finalize();
        hex_prefix(&digest, 16)
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        let mut inner = self.inner.lock().await;
        maybe_cleanup(&mut inner, self.cleanup_interval_seconds);

        let now = Utc::now();
        let expired = inner.entries.get(key).is_some_and(|e| e.is_expired(now));
        if expired {
            inner.entries.remove(key);
            inner.stats.misses += 1;
            inner.stats.evictions += 1;
            inner.stats.total_entries = inner.entries.len();
            return None;
        }

        match inner.entries.get_mut(key) {
            Some(entry) => {
                entry.hits += 1;
                let value = entry.value.clone();
                inner.stats.hits += 1;
                Some(value)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    pub async fn set(&self, key: impl Into<String>, value: V, ttl_seconds: Option<i64>) {
        let mut inner = self.inner.lock().await;
        maybe_cleanup(&mut inner, self.cleanup_interval_seconds);
        let ttl = ttl_seconds.unwrap_or(self.default_ttl_seconds);
        inner
            .entries
            .insert(key.into(), CacheEntry::new(value, Utc::now(), ttl));
        evict_lru(&mut inner, self.max_entries);
    }

    /// Get-or-compute. The factory runs with the lock released, so a slow
    /// fill for one key never blocks lookups of unrelated keys.
    pub async fn get_or_set<F, Fut>(&self, key: &str, ttl_seconds: Option<i64>, factory: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        if let Some(v) = self.get(key).await {
            return v;
        }
        let value = factory().await;
        self.set(key.to_string(), value.clone(), ttl_seconds).await;
        value
    }

    pub async fn delete(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().await;
        let removed = inner.entries.remove(key).is_some();
        inner.stats.total_entries = inner.entries.len();
        removed
    }

    pub async fn clear(&self) {
        let mut inner = self.inner.lock().await;
        inner.entries.clear();
        inner.stats.total_entries = 0;
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.lock().await.stats
    }

    pub async fn has(&self, key: &str) -> bool {
        self.get(key).await.is_some()
    }
}

fn maybe_cleanup<V>(inner: &mut Inner<V>, cleanup_interval_seconds: i64) {
    let now = Utc::now();
    if (now - inner.last_cleanup).num_seconds() <= cleanup_interval_seconds {
        return;
    }
    let before = inner.entries.len();
    inner.entries.retain(|_, entry| !entry.is_expired(now));
    let removed = before - inner.entries.len();
    if removed > 0 {
        inner.stats.evictions += removed as u64;
        debug!(removed, "cache cleanup removed expired entries");
    }
    inner.stats.total_entries = inner.entries.len();
    inner.last_cleanup = now;
}

/// LRU eviction by `(hits asc, created_at desc)`: among the
/// entries to remove, prefer the least-hit ones, breaking ties by keeping
/// the newest.
fn evict_lru<V>(inner: &mut Inner<V>, max_entries: usize) {
    if inner.entries.len() <= max_entries {
        return;
    }
    let mut keys: Vec<String> = inner.entries.keys().cloned().collect();
    keys.sort_by(|a, b| {
        let ea = &inner.entries[a];
        let eb = &inner.entries[b];
        ea.hits
            .cmp(&eb.hits)
            .then_with(|| eb.created_at.cmp(&ea.created_at))
    });
    let to_remove = inner.entries.len() - max_entries;
    for key in keys.into_iter().take(to_remove) {
        inner.entries.remove(&key);
        inner.stats.evictions += 1;
    }
    inner.stats.total_entries = inner.entries.len();
    debug!(to_remove, "cache LRU eviction");
}

fn hex_prefix(bytes: &[u8], len: usize) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
        .chars()
        .take(len)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expired_entry_returns_none_and_counts_as_miss() {
        let cache: TtlCache<String> = TtlCache::new(0, 10, 3600);
        cache.set("k", "v".to_string(), Some(0)).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(cache.get("k").await, None);
        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn hit_increments_stats_and_entry_hits() {
        let cache: TtlCache<String> = TtlCache::new(3600, 10, 3600);
        cache.set("k", "v".to_string(), None).await;
        assert_eq!(cache.get("k").await, Some("v".to_string()));
        assert_eq!(cache.get("k").await, Some("v".to_string()));
        let stats = cache.stats().await;
        assert_eq!(stats.hits, 2);
    }

    #[tokio::test]
    async fn lru_eviction_prefers_least_hit_entries() {
        let cache: TtlCache<i32> = TtlCache::new(3600, 2, 3600);
        cache.set("a", 1, None).await;
        cache.set("b", 2, None).await;
        // Touch "a" so it has more hits than "b".
        cache.get("a").await;
        cache.set("c", 3, None).await;
        assert_eq!(cache.get("b").await, None);
        assert_eq!(cache.get("a").await, Some(1));
        assert_eq!(cache.get("c").await, Some(3));
    }

    #[tokio::test]
    async fn get_or_set_only_calls_factory_on_miss() {
        let cache: TtlCache<i32> = TtlCache::new(3600, 10, 3600);
        let mut calls = 0;
        let v1 = cache.get_or_set("k", None, || async { calls += 1; 42 }).await;
        assert_eq!(v1, 42);
        let v2 = cache.get_or_set("k", None, || async { calls += 1; 99 }).await;
        assert_eq!(v2, 42);
        assert_eq!(calls, 1);
    }

    #[test]
    fn hash_key_is_stable_and_bounded_length() {
        let k1 = TtlCache::<()>::hash_key(&["search", "rust macros"]);
        let k2 = TtlCache::<()>::hash_key(&["search", "rust macros"]);
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 16);
    }
}
