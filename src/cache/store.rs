//! Bounded in-memory store with per-entry TTL and strict LRU eviction.
//!
//! [`TtlStore`] wraps an [`lru::LruCache`] behind a mutex. Every `get`/`set`
//! runs under the lock, so no caller ever observes a partially updated
//! entry. Expired entries are treated as absent and removed lazily when a
//! lookup touches them, when capacity pressure pushes them out, or when
//! [`TtlStore::purge_expired`] runs from the maintenance task.
//!
//! Eviction order is exact least-recently-accessed: a successful `get`
//! moves the entry to the front, so it is the last candidate for eviction.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lru::LruCache;
use tokio::time::Instant;
use tracing::debug;

use crate::telemetry;
use crate::{Result, SluiceError};

/// Configuration for the response store.
///
/// ```rust
/// # use sluice::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(1_000)
///     .ttl(Duration::from_secs(300));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of cached entries. Must be non-zero. Default: 1,000.
    pub max_entries: usize,
    /// Time-to-live for entries inserted without an explicit TTL. Default: 5 minutes.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            ttl: Duration::from_secs(300),
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of cached entries.
    pub fn max_entries(mut self, n: usize) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the default time-to-live.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }
}

/// A single cached value with its expiry bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at: Instant,
    pub ttl: Duration,
    pub last_accessed: Instant,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration, now: Instant) -> Self {
        Self {
            value,
            inserted_at: now,
            ttl,
            last_accessed: now,
        }
    }

    /// Visible only while `now < inserted_at + ttl`.
    fn is_fresh(&self, now: Instant) -> bool {
        self.inserted_at
            .checked_add(self.ttl)
            .is_none_or(|expires_at| now < expires_at)
    }
}

/// Point-in-time size information.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreStats {
    /// Entries currently held, including expired ones not yet reclaimed.
    pub size: usize,
    /// Capacity.
    pub max: usize,
}

/// Thread-safe TTL + LRU key/value store.
pub struct TtlStore<V> {
    entries: Mutex<LruCache<String, CacheEntry<V>>>,
    default_ttl: Duration,
    max: usize,
}

impl<V: Clone> TtlStore<V> {
    /// Create an empty store.
    ///
    /// Fails with [`SluiceError::Configuration`] if `max_entries` is zero.
    pub fn new(config: &CacheConfig) -> Result<Self> {
        let capacity = NonZeroUsize::new(config.max_entries).ok_or_else(|| {
            SluiceError::Configuration("cache max_entries must be greater than zero".to_string())
        })?;
        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl: config.ttl,
            max: config.max_entries,
        })
    }

    /// Look up a fresh value, refreshing its recency.
    ///
    /// Returns `None` on miss. An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut entries = self.lock();

        let fresh = match entries.peek(key) {
            Some(entry) => entry.is_fresh(now),
            None => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                return None;
            }
        };

        if !fresh {
            entries.pop(key);
            debug!(key, "dropping expired cache entry");
            metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
            return None;
        }

        let entry = entries.get_mut(key)?;
        entry.last_accessed = now;
        metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
        Some(entry.value.clone())
    }

    /// Insert or replace a value using the default TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.default_ttl);
    }

    /// Insert or replace a value with an explicit TTL.
    ///
    /// Inserting a new key into a full store evicts the least recently
    /// accessed entry first.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let entry = CacheEntry::new(value, ttl, Instant::now());
        let mut entries = self.lock();
        if let Some((displaced, _)) = entries.push(key.clone(), entry) {
            // `push` hands back the old pair on replacement too.
            if displaced != key {
                debug!(evicted = %displaced, inserted = %key, "evicted least recently used entry");
                metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL).increment(1);
            }
        }
    }

    /// Remove a key. Returns whether an entry was present.
    pub fn delete(&self, key: &str) -> bool {
        self.lock().pop(key).is_some()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            size: self.lock().len(),
            max: self.max,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let expired: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| !entry.is_fresh(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            entries.pop(key);
        }
        expired.len()
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheEntry<V>>> {
        // A panic while holding the lock cannot leave an entry half-written:
        // every mutation is a single LruCache call.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_capacity_is_a_configuration_error() {
        let result = TtlStore::<u32>::new(&CacheConfig::new().max_entries(0));
        assert!(matches!(result, Err(SluiceError::Configuration(_))));
    }

    #[test]
    fn entry_freshness_boundary() {
        let now = Instant::now();
        let entry = CacheEntry::new(1, Duration::from_secs(10), now);
        assert!(entry.is_fresh(now));
        assert!(entry.is_fresh(now + Duration::from_millis(9_999)));
        assert!(!entry.is_fresh(now + Duration::from_secs(10)));
    }

    #[test]
    fn replacing_a_key_does_not_count_as_eviction() {
        let store = TtlStore::new(&CacheConfig::new().max_entries(2)).unwrap();
        store.set("a", 1);
        store.set("b", 2);
        store.set("a", 3);
        assert_eq!(store.get("a"), Some(3));
        assert_eq!(store.get("b"), Some(2));
        assert_eq!(store.stats(), StoreStats { size: 2, max: 2 });
    }
}
