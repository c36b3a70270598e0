//! # Cache Metrics
//!
//! Process-lifetime counters shared by a backend and everything that reads
//! its statistics. Counters only grow; memory gauges move both ways and
//! track their peak.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Operation counters and gauges for one cache backend
#[derive(Debug, Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    timed_operations: AtomicU64,
    response_time_total_us: AtomicU64,
    /// Backend-reported average response time, 0 when never sampled
    sampled_response_time_us: AtomicU64,
    current_memory_bytes: AtomicU64,
    peak_memory_bytes: AtomicU64,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_set(&self) {
        self.sets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_deletes(&self, count: u64) {
        self.deletes.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_response_time(&self, elapsed: Duration) {
        self.timed_operations.fetch_add(1, Ordering::Relaxed);
        self.response_time_total_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    /// Update the current memory gauge, raising the peak if needed
    pub fn set_memory_usage(&self, bytes: u64) {
        self.current_memory_bytes.store(bytes, Ordering::Relaxed);
        self.peak_memory_bytes.fetch_max(bytes, Ordering::Relaxed);
    }

    /// Record values reported by the storage backend itself
    pub fn record_backend_sample(&self, memory_bytes: u64, average_response: Duration) {
        self.set_memory_usage(memory_bytes);
        self.sampled_response_time_us
            .store(average_response.as_micros().max(1) as u64, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn current_memory_bytes(&self) -> u64 {
        self.current_memory_bytes.load(Ordering::Relaxed)
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        let sampled = self.sampled_response_time_us.load(Ordering::Relaxed);
        let average_response_time = if sampled > 0 {
            Duration::from_micros(sampled)
        } else {
            let ops = self.timed_operations.load(Ordering::Relaxed);
            let total = self.response_time_total_us.load(Ordering::Relaxed);
            Duration::from_micros(total.checked_div(ops).unwrap_or(0))
        };

        CacheMetricsSnapshot {
            hits: self.hits(),
            misses: self.misses(),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            average_response_time,
            current_memory_bytes: self.current_memory_bytes(),
            peak_memory_bytes: self.peak_memory_bytes.load(Ordering::Relaxed),
        }
    }
}

/// Read-only view of [`CacheMetrics`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub average_response_time: Duration,
    pub current_memory_bytes: u64,
    pub peak_memory_bytes: u64,
}

impl CacheMetricsSnapshot {
    pub fn hit_rate(&self) -> f64 {
        ratio(self.hits, self.hits + self.misses)
    }
}

/// Backend statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub provider: String,
    pub entry_count: u64,
    pub total_size_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub evictions: u64,
    pub memory_usage_bytes: u64,
    pub peak_memory_bytes: u64,
    pub oldest_entry_at: Option<DateTime<Utc>>,
    pub newest_entry_at: Option<DateTime<Utc>>,
}

impl CacheStats {
    /// Build stats from entry-level figures plus the backend's metrics
    pub fn from_parts(
        provider: &str,
        entry_count: u64,
        total_size_bytes: u64,
        oldest_entry_at: Option<DateTime<Utc>>,
        newest_entry_at: Option<DateTime<Utc>>,
        metrics: &CacheMetricsSnapshot,
    ) -> Self {
        let lookups = metrics.hits + metrics.misses;
        Self {
            provider: provider.to_string(),
            entry_count,
            total_size_bytes,
            hits: metrics.hits,
            misses: metrics.misses,
            hit_rate: ratio(metrics.hits, lookups),
            miss_rate: ratio(metrics.misses, lookups),
            evictions: metrics.evictions,
            memory_usage_bytes: metrics.current_memory_bytes,
            peak_memory_bytes: metrics.peak_memory_bytes,
            oldest_entry_at,
            newest_entry_at,
        }
    }

    /// Stats for a backend that stores nothing
    pub fn empty(provider: &str) -> Self {
        Self::from_parts(provider, 0, 0, None, None, &CacheMetrics::new().snapshot())
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = CacheMetrics::new();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();
        metrics.record_set();
        metrics.record_deletes(3);
        metrics.record_evictions(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.sets, 1);
        assert_eq!(snapshot.deletes, 3);
        assert_eq!(snapshot.evictions, 2);
        assert!((snapshot.hit_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_peak_memory_tracks_maximum() {
        let metrics = CacheMetrics::new();
        metrics.set_memory_usage(100);
        metrics.set_memory_usage(400);
        metrics.set_memory_usage(50);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.current_memory_bytes, 50);
        assert_eq!(snapshot.peak_memory_bytes, 400);
    }

    #[test]
    fn test_average_response_time_prefers_backend_sample() {
        let metrics = CacheMetrics::new();
        metrics.record_response_time(Duration::from_micros(100));
        metrics.record_response_time(Duration::from_micros(300));
        assert_eq!(
            metrics.snapshot().average_response_time,
            Duration::from_micros(200)
        );

        metrics.record_backend_sample(1024, Duration::from_micros(900));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.average_response_time, Duration::from_micros(900));
        assert_eq!(snapshot.current_memory_bytes, 1024);
    }

    #[test]
    fn test_stats_rates_without_traffic() {
        let stats = CacheStats::empty("noop");
        assert_eq!(stats.hit_rate, 0.0);
        assert_eq!(stats.miss_rate, 0.0);
        assert_eq!(stats.entry_count, 0);
    }
}
