//! Shared fixtures for integration tests.

#![allow(dead_code)]

use analysis_cache::{
    AnalysisCache, CacheProvider, InMemoryCacheBackend, InvalidationConfig,
    InvalidationRuleEngine, ManualClock, MemoryBackendConfig, SharedClock,
};
use chrono::{TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;

pub const NAMESPACE: &str = "analysis";

/// Midnight UTC, 2024-01-01 (a Monday)
pub fn epoch() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(epoch()))
}

pub fn memory_cache_with(config: MemoryBackendConfig, clock: Arc<ManualClock>) -> AnalysisCache {
    let clock: SharedClock = clock;
    let backend = InMemoryCacheBackend::new(config, clock);
    AnalysisCache::new(CacheProvider::memory(backend), NAMESPACE)
}

pub fn memory_cache(clock: Arc<ManualClock>) -> AnalysisCache {
    memory_cache_with(MemoryBackendConfig::default(), clock)
}

pub fn memory_cache_with_ttl(default_ttl: Duration, clock: Arc<ManualClock>) -> AnalysisCache {
    memory_cache_with(
        MemoryBackendConfig {
            default_ttl,
            ..MemoryBackendConfig::default()
        },
        clock,
    )
}

/// Engine without the built-in rules
pub fn bare_engine(cache: AnalysisCache, clock: Arc<ManualClock>) -> InvalidationRuleEngine {
    let config = InvalidationConfig {
        install_default_rules: false,
        ..InvalidationConfig::default()
    };
    InvalidationRuleEngine::new(cache, clock, &config)
}
