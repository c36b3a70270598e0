//! In-process cache provider
//!
//! Holds entries in a process-local map under a memory budget.
//!
//! - **Passive expiry**: `get` treats an expired entry as a miss and drops it.
//! - **Active expiry**: a background sweeper removes expired entries on a
//!   fixed interval, so unread entries cannot pin memory.
//! - **Batch LRU eviction**: when a `set` would exceed the budget, expired
//!   entries go first, then the least-recently-accessed quarter of the map
//!   is evicted in one pass (repeated until the new entry fits).
//! - **Incremental size accounting**: each entry's size is computed once at
//!   insertion; the running total is adjusted on insert, evict and delete.
//!
//! **Important**: this cache is NOT distributed. Each process maintains its
//! own entries, and invalidations in one process are invisible to others.

use crate::cache::entry::{CacheEntry, CacheValue, InvalidationFilter};
use crate::cache::errors::{CacheError, CacheResult};
use crate::cache::traits::CacheBackend;
use crate::clock::{SharedClock, SystemClock};
use crate::fingerprint::ContentFingerprint;
use crate::metrics::{CacheMetrics, CacheMetricsSnapshot, CacheStats};
use chrono::{DateTime, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One eviction pass removes `len / EVICTION_BATCH_DIVISOR` entries (25%)
const EVICTION_BATCH_DIVISOR: usize = 4;

/// Configuration for the in-process backend
#[derive(Debug, Clone)]
pub struct MemoryBackendConfig {
    /// TTL applied when `set` is called without one
    pub default_ttl: Duration,
    /// Upper bound on the summed size of stored payloads
    pub max_memory_bytes: u64,
    /// Payloads above this many JSON bytes are stored gzip-compressed
    pub compression_threshold: Option<usize>,
    /// Period of the active expiry sweep
    pub sweep_interval: Duration,
}

impl Default for MemoryBackendConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3600),
            max_memory_bytes: 100 * 1024 * 1024,
            compression_threshold: Some(64 * 1024),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

struct MemoryStore {
    /// Most recently used first; `get_mut` promotes, `pop_lru` evicts
    entries: LruCache<String, CacheEntry>,
    total_size: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            entries: LruCache::unbounded(),
            total_size: 0,
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("entries", &self.entries.len())
            .field("total_size", &self.total_size)
            .finish()
    }
}

impl MemoryStore {
    fn insert(&mut self, entry: CacheEntry) {
        self.total_size += entry.size_bytes;
        if let Some(old) = self.entries.put(entry.key.clone(), entry) {
            self.total_size -= old.size_bytes;
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.total_size -= entry.size_bytes;
        Some(entry)
    }

    /// Remove every entry the predicate selects
    fn remove_where<F>(&mut self, mut predicate: F) -> Vec<CacheEntry>
    where
        F: FnMut(&CacheEntry) -> bool,
    {
        let keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| predicate(entry))
            .map(|(key, _)| key.clone())
            .collect();

        keys.iter().filter_map(|key| self.remove(key)).collect()
    }

    /// Evict the least-recently-used quarter of entries (at least one)
    fn evict_lru_batch(&mut self) -> u64 {
        let batch = (self.entries.len() / EVICTION_BATCH_DIVISOR).max(1);

        let mut evicted = 0;
        while evicted < batch {
            let Some((_, entry)) = self.entries.pop_lru() else {
                break;
            };
            self.total_size -= entry.size_bytes;
            evicted += 1;
        }
        evicted as u64
    }

    /// Summed size of entries that have not expired
    fn live_size(&self, now: DateTime<Utc>) -> u64 {
        self.entries
            .iter()
            .filter(|(_, entry)| !entry.is_expired(now))
            .map(|(_, entry)| entry.size_bytes)
            .sum()
    }
}

#[derive(Debug)]
struct MemoryShared {
    store: Mutex<MemoryStore>,
    metrics: CacheMetrics,
    config: MemoryBackendConfig,
    clock: SharedClock,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for MemoryShared {
    fn drop(&mut self) {
        if let Some(handle) = self.sweeper.get_mut().take() {
            handle.abort();
        }
    }
}

/// In-process cache backend with LRU eviction and active expiry
#[derive(Debug, Clone)]
pub struct InMemoryCacheBackend {
    shared: Arc<MemoryShared>,
}

enum Lookup {
    Miss,
    Expired,
    Hit(CacheEntry),
}

impl InMemoryCacheBackend {
    /// Create a backend without a sweeper; see [`Self::start_sweeper`]
    pub fn new(config: MemoryBackendConfig, clock: SharedClock) -> Self {
        debug!(
            max_memory_bytes = config.max_memory_bytes,
            default_ttl_seconds = config.default_ttl.as_secs(),
            "In-memory cache backend created"
        );

        Self {
            shared: Arc::new(MemoryShared {
                store: Mutex::new(MemoryStore::default()),
                metrics: CacheMetrics::new(),
                config,
                clock,
                sweeper: Mutex::new(None),
            }),
        }
    }

    /// Create with default configuration and the system clock (for testing)
    pub fn with_defaults() -> Self {
        Self::new(MemoryBackendConfig::default(), SystemClock::shared())
    }

    /// Spawn the active expiry sweep on the current tokio runtime
    ///
    /// The task holds only a weak reference and ends once the backend is
    /// dropped. Calling this again replaces the previous sweeper. A zero
    /// interval falls back to the default period.
    pub fn start_sweeper(&self) {
        let weak: Weak<MemoryShared> = Arc::downgrade(&self.shared);
        let mut period = self.shared.config.sweep_interval;
        if period.is_zero() {
            period = MemoryBackendConfig::default().sweep_interval;
            warn!(
                fallback_seconds = period.as_secs(),
                "Sweep interval of zero is not usable, using default"
            );
        }

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                Self::sweep_shared(&shared);
            }
        });

        info!(
            sweep_interval_seconds = period.as_secs(),
            "In-memory cache expiry sweeper started"
        );

        if let Some(previous) = self.shared.sweeper.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Remove every expired entry now, returning how many were dropped
    pub fn sweep_expired(&self) -> u64 {
        Self::sweep_shared(&self.shared)
    }

    fn sweep_shared(shared: &MemoryShared) -> u64 {
        let now = shared.clock.now();
        let mut store = shared.store.lock();
        let removed = store.remove_where(|entry| entry.is_expired(now)).len() as u64;
        shared.metrics.set_memory_usage(store.total_size);
        drop(store);

        if removed > 0 {
            shared.metrics.record_expirations(removed);
            debug!(removed = removed, "Expired cache entries swept");
        }
        removed
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.shared.store.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Running sum of stored entry sizes
    pub fn total_size_bytes(&self) -> u64 {
        self.shared.store.lock().total_size
    }

    /// Whether a key is stored, ignoring expiry and without touching it
    pub fn contains_key(&self, key: &str) -> bool {
        self.shared.store.lock().entries.contains(key)
    }

    fn purge(&self, filter: &InvalidationFilter) -> u64 {
        let started = Instant::now();
        let now = self.shared.clock.now();

        let mut store = self.shared.store.lock();
        let removed = store.remove_where(|entry| filter.matches(&entry.view(), now));
        self.shared.metrics.set_memory_usage(store.total_size);
        drop(store);

        let (expired, live): (Vec<_>, Vec<_>) =
            removed.into_iter().partition(|entry| entry.is_expired(now));
        let deleted = live.len() as u64;

        self.shared.metrics.record_deletes(deleted);
        self.shared.metrics.record_expirations(expired.len() as u64);
        self.shared.metrics.record_response_time(started.elapsed());
        deleted
    }
}

impl CacheBackend for InMemoryCacheBackend {
    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        let started = Instant::now();
        let now = self.shared.clock.now();
        let metrics = &self.shared.metrics;

        let lookup = {
            let mut store = self.shared.store.lock();
            let lookup = match store.entries.get_mut(key) {
                None => Lookup::Miss,
                Some(entry) if entry.is_expired(now) => Lookup::Expired,
                Some(entry) => {
                    entry.touch(now);
                    Lookup::Hit(entry.clone())
                }
            };
            if matches!(lookup, Lookup::Expired) {
                store.remove(key);
                metrics.set_memory_usage(store.total_size);
            }
            lookup
        };
        metrics.record_response_time(started.elapsed());

        match lookup {
            Lookup::Miss => {
                metrics.record_miss();
                debug!(key = key, "Cache MISS (memory)");
                Ok(None)
            }
            Lookup::Expired => {
                metrics.record_miss();
                metrics.record_expirations(1);
                debug!(key = key, "Cache MISS (memory, expired)");
                Ok(None)
            }
            Lookup::Hit(entry) => match entry.decode() {
                Ok(value) => {
                    metrics.record_hit();
                    debug!(key = key, access_count = entry.access_count, "Cache HIT (memory)");
                    Ok(Some(value))
                }
                Err(e) => {
                    // Undecodable entries are purged so the next read recomputes
                    let mut store = self.shared.store.lock();
                    store.remove(key);
                    metrics.set_memory_usage(store.total_size);
                    drop(store);
                    metrics.record_miss();
                    Err(e)
                }
            },
        }
    }

    async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> CacheResult<()> {
        let started = Instant::now();
        let config = &self.shared.config;
        let metrics = &self.shared.metrics;
        let now = self.shared.clock.now();
        let ttl = ttl.unwrap_or(config.default_ttl);

        let entry = CacheEntry::encode(key, value, ttl, now, config.compression_threshold)?;
        if entry.size_bytes > config.max_memory_bytes {
            return Err(CacheError::CapacityExceeded {
                size: entry.size_bytes,
                budget: config.max_memory_bytes,
            });
        }

        let mut evicted = 0;
        let mut expired = 0;
        {
            let mut store = self.shared.store.lock();
            store.remove(key);

            if store.total_size + entry.size_bytes > config.max_memory_bytes {
                expired = store.remove_where(|e| e.is_expired(now)).len() as u64;
            }
            while store.total_size + entry.size_bytes > config.max_memory_bytes
                && !store.entries.is_empty()
            {
                evicted += store.evict_lru_batch();
            }

            store.insert(entry);
            metrics.set_memory_usage(store.total_size);
        }

        metrics.record_set();
        metrics.record_expirations(expired);
        if evicted > 0 {
            metrics.record_evictions(evicted);
            debug!(
                key = key,
                evicted = evicted,
                "Memory budget reached, evicted least-recently-used entries"
            );
        }
        metrics.record_response_time(started.elapsed());

        debug!(key = key, ttl_seconds = ttl.as_secs(), "Cache SET (memory)");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        let now = self.shared.clock.now();
        let removed = {
            let mut store = self.shared.store.lock();
            let removed = store.remove(key);
            self.shared.metrics.set_memory_usage(store.total_size);
            removed
        };

        let existed = removed.is_some_and(|entry| !entry.is_expired(now));
        if existed {
            self.shared.metrics.record_deletes(1);
        }
        debug!(key = key, existed = existed, "Cache DEL (memory)");
        Ok(existed)
    }

    async fn invalidate_by_pattern(&self, prefix: &str) -> CacheResult<u64> {
        let deleted = self.purge(&InvalidationFilter::prefix(prefix));
        debug!(prefix = prefix, deleted = deleted, "Cache pattern DEL (memory)");
        Ok(deleted)
    }

    async fn invalidate_by_content_hash(&self, content_hash: &ContentFingerprint) -> CacheResult<u64> {
        let deleted = self.purge(&InvalidationFilter::content_hash(content_hash.clone()));
        debug!(
            content_hash = %content_hash.short(),
            deleted = deleted,
            "Cache content-hash DEL (memory)"
        );
        Ok(deleted)
    }

    async fn invalidate_matching(&self, filter: &InvalidationFilter) -> CacheResult<u64> {
        let deleted = self.purge(filter);
        debug!(filter = ?filter, deleted = deleted, "Cache filtered DEL (memory)");
        Ok(deleted)
    }

    async fn ttl_remaining(&self, key: &str) -> CacheResult<Option<Duration>> {
        let now = self.shared.clock.now();
        let store = self.shared.store.lock();
        Ok(store
            .entries
            .peek(key)
            .filter(|entry| !entry.is_expired(now))
            .and_then(|entry| entry.remaining_ttl(now)))
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        let now = self.shared.clock.now();
        let store = self.shared.store.lock();

        let live = store.entries.iter().map(|(_, e)| e).filter(|e| !e.is_expired(now));
        let mut entry_count = 0u64;
        let mut oldest: Option<DateTime<Utc>> = None;
        let mut newest: Option<DateTime<Utc>> = None;
        for entry in live {
            entry_count += 1;
            oldest = Some(oldest.map_or(entry.created_at, |t| t.min(entry.created_at)));
            newest = Some(newest.map_or(entry.created_at, |t| t.max(entry.created_at)));
        }
        // Expired entries awaiting the sweeper are excluded like in `entry_count`
        let total_size = store.live_size(now);
        drop(store);

        Ok(CacheStats::from_parts(
            self.provider_name(),
            entry_count,
            total_size,
            oldest,
            newest,
            &self.shared.metrics.snapshot(),
        ))
    }

    fn metrics(&self) -> CacheMetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    async fn health_check(&self) -> CacheResult<bool> {
        // In-memory cache is always healthy
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "memory"
    }
}
