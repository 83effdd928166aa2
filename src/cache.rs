//! In-memory TTL cache with FIFO-by-write capacity eviction.
//!
//! Entries expire `ttl` after they were last written. Expired entries are
//! removed lazily when read and eagerly by a periodic sweep; between the two
//! they stay physically present and are reported as `expired_but_present_count`.
//! When an insert of a new key would exceed capacity, the entry written
//! longest ago is evicted. Reads do not refresh an entry's position.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::clock::{duration_millis, Clock, Timestamp};
use crate::constants::{
    CACHE_STATS_WINDOW, GEOCODING_CACHE_MAX_SIZE, GEOCODING_CACHE_SWEEP_INTERVAL,
    GEOCODING_CACHE_TTL, WEATHER_CACHE_MAX_SIZE, WEATHER_CACHE_SWEEP_INTERVAL, WEATHER_CACHE_TTL,
};
use crate::task::PeriodicTask;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub default_ttl: Duration,
    pub max_size: usize,
    pub cleanup_interval: Duration,
}

impl CacheConfig {
    pub fn geocoding() -> Self {
        Self {
            default_ttl: GEOCODING_CACHE_TTL,
            max_size: GEOCODING_CACHE_MAX_SIZE,
            cleanup_interval: GEOCODING_CACHE_SWEEP_INTERVAL,
        }
    }

    pub fn weather() -> Self {
        Self {
            default_ttl: WEATHER_CACHE_TTL,
            max_size: WEATHER_CACHE_MAX_SIZE,
            cleanup_interval: WEATHER_CACHE_SWEEP_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
    pub expired_but_present_count: usize,
    pub average_age_ms: f64,
    pub hit_rate: f64,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    stored_at: Timestamp,
    ttl_ms: i64,
    // Write order, breaks ties between equal `stored_at`
    seq: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Timestamp) -> bool {
        now.saturating_sub(self.stored_at) > self.ttl_ms
    }
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    hits: u64,
    misses: u64,
    next_seq: u64,
}

impl<V> Inner<V> {
    fn record(&mut self, hit: bool) {
        if hit {
            self.hits += 1;
        } else {
            self.misses += 1;
        }

        if self.hits + self.misses > CACHE_STATS_WINDOW {
            self.hits /= 2;
            self.misses /= 2;
        }
    }

    fn evict_oldest(&mut self) -> Option<String> {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| (entry.stored_at, entry.seq))
            .map(|(key, _)| key.clone())?;
        self.entries.remove(&oldest);
        Some(oldest)
    }
}

/// Thread-safe TTL cache keyed by string.
pub struct TtlCache<V> {
    name: &'static str,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner<V>>,
    sweeper: Mutex<Option<PeriodicTask>>,
    shut_down: AtomicBool,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            config,
            clock,
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(config.max_size.min(1024)),
                hits: 0,
                misses: 0,
                next_seq: 0,
            }),
            sweeper: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Stores `value` with the default TTL.
    pub fn set(&self, key: impl Into<String>, value: V) {
        self.set_with_ttl(key, value, self.config.default_ttl);
    }

    /// Stores `value`, replacing any existing entry and its TTL.
    pub fn set_with_ttl(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();

        if !inner.entries.contains_key(&key) {
            // A zero-capacity cache stores nothing
            if self.config.max_size == 0 {
                return;
            }
            if inner.entries.len() >= self.config.max_size {
                if let Some(evicted) = inner.evict_oldest() {
                    tracing::debug!(cache = self.name, key = %evicted, "Evicted oldest cache entry");
                }
            }
        }

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(
            key,
            CacheEntry {
                value,
                stored_at: now,
                ttl_ms: duration_millis(ttl),
                seq,
            },
        );
    }

    /// Returns the live value for `key`, dropping it if it has expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();

        let value = match inner.entries.get(key) {
            Some(entry) if entry.is_expired(now) => {
                inner.entries.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        };

        inner.record(value.is_some());
        value
    }

    pub fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().entries.remove(key).is_some()
    }

    /// Removes every entry; hit/miss counters are kept.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now_millis();
        let inner = self.inner.lock();

        let size = inner.entries.len();
        let (expired, total_age) = inner
            .entries
            .values()
            .fold((0usize, 0i64), |(expired, age), entry| {
                (
                    expired + usize::from(entry.is_expired(now)),
                    age + (now - entry.stored_at).max(0),
                )
            });

        let observations = inner.hits + inner.misses;

        CacheStats {
            size,
            capacity: self.config.max_size,
            expired_but_present_count: expired,
            average_age_ms: if size == 0 {
                0.0
            } else {
                total_age as f64 / size as f64
            },
            hit_rate: if observations == 0 {
                0.0
            } else {
                inner.hits as f64 / observations as f64
            },
            hits: inner.hits,
            misses: inner.misses,
        }
    }

    /// Removes every expired entry and returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();

        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - inner.entries.len();

        if removed > 0 {
            tracing::debug!(cache = self.name, removed, "Swept expired cache entries");
        }
        removed
    }

    /// Starts the periodic sweep on the configured interval.
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() || self.shut_down.load(Ordering::SeqCst) {
            return;
        }

        let cache: Weak<Self> = Arc::downgrade(self);
        *sweeper = Some(PeriodicTask::spawn(
            "cache-sweep",
            self.config.cleanup_interval,
            move || {
                if let Some(cache) = cache.upgrade() {
                    cache.sweep();
                }
                std::future::ready(())
            },
        ));
    }

    /// Stops the periodic sweep, waits for it to exit and drops all entries.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            tracing::warn!(cache = self.name, "Cache already shut down");
            return;
        }

        let sweeper = self.sweeper.lock().take();
        if let Some(task) = sweeper {
            task.join().await;
        }
        self.clear();

        tracing::info!(cache = self.name, "Cache shut down");
    }
}

/// Read-only view of a cache for health reporting.
pub trait CacheStatsSource: Send + Sync {
    fn name(&self) -> &'static str;
    fn stats(&self) -> CacheStats;
}

impl<V> CacheStatsSource for TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn stats(&self) -> CacheStats {
        TtlCache::stats(self)
    }
}
