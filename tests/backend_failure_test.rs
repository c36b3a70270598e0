//! `AnalysisCache` over backends that fail or never answer: every read is a
//! miss, every write reports `false` and computations still return.

mod common;

use analysis_cache::{
    AnalysisCache, AnalysisOptions, AnalysisType, CacheBackend, CacheError, CacheMetrics,
    CacheMetricsSnapshot, CacheProvider, CacheResult, CacheStats, CacheValue, CallOptions,
    ContentFingerprint, InvalidationFilter,
};
use common::NAMESPACE;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Every call errors immediately
    Refuse,
    /// Every call yields once, then never completes
    Stall,
}

#[derive(Debug)]
struct FaultyBackend {
    fault: Fault,
}

impl FaultyBackend {
    fn new(fault: Fault) -> Self {
        Self { fault }
    }

    async fn fail<T>(&self) -> CacheResult<T> {
        match self.fault {
            Fault::Refuse => Err(CacheError::ConnectionError("connection refused".to_string())),
            Fault::Stall => {
                tokio::task::yield_now().await;
                futures::future::pending().await
            }
        }
    }
}

impl CacheBackend for FaultyBackend {
    async fn get(&self, _key: &str) -> CacheResult<Option<Value>> {
        self.fail().await
    }

    async fn set(
        &self,
        _key: &str,
        _value: &CacheValue,
        _ttl: Option<Duration>,
    ) -> CacheResult<()> {
        self.fail().await
    }

    async fn delete(&self, _key: &str) -> CacheResult<bool> {
        self.fail().await
    }

    async fn invalidate_by_pattern(&self, _prefix: &str) -> CacheResult<u64> {
        self.fail().await
    }

    async fn invalidate_by_content_hash(&self, _hash: &ContentFingerprint) -> CacheResult<u64> {
        self.fail().await
    }

    async fn invalidate_matching(&self, _filter: &InvalidationFilter) -> CacheResult<u64> {
        self.fail().await
    }

    async fn ttl_remaining(&self, _key: &str) -> CacheResult<Option<Duration>> {
        self.fail().await
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        self.fail().await
    }

    fn metrics(&self) -> CacheMetricsSnapshot {
        CacheMetrics::default().snapshot()
    }

    async fn health_check(&self) -> CacheResult<bool> {
        self.fail().await
    }

    fn provider_name(&self) -> &'static str {
        "faulty"
    }
}

fn faulty_cache(fault: Fault) -> AnalysisCache {
    let provider = CacheProvider::custom(FaultyBackend::new(fault))
        .with_operation_timeout(Duration::from_millis(20));
    AnalysisCache::new(provider, NAMESPACE)
}

async fn assert_fails_open(cache: &AnalysisCache) {
    let options = AnalysisOptions::None;

    assert_eq!(cache.get::<u32>(AnalysisType::Labels, "img", &options).await, None);
    assert!(!cache.set(AnalysisType::Labels, "img", &options, &3u32, None).await);

    let computed = Arc::new(AtomicUsize::new(0));
    for _ in 0..2 {
        let computed = Arc::clone(&computed);
        let value: u32 = cache
            .get_or_compute(
                AnalysisType::Labels,
                "img",
                &options,
                move || async move {
                    computed.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, std::io::Error>(11)
                },
                CallOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(value, 11);
    }
    // Nothing was stored, so the second call computes again
    assert_eq!(computed.load(Ordering::SeqCst), 2);

    assert!(!cache.invalidate(AnalysisType::Labels, "img", &options).await);
    assert_eq!(cache.invalidate_by_type(AnalysisType::Labels).await, 0);
    assert!(!cache.health_check().await);
    assert_eq!(cache.in_flight(), 0);
}

#[tokio::test]
async fn test_refusing_backend_fails_open() {
    let cache = faulty_cache(Fault::Refuse);
    assert_fails_open(&cache).await;

    assert!(matches!(
        cache.provider().get("analysis:labels:k").await,
        Err(CacheError::ConnectionError(_))
    ));
}

#[tokio::test]
async fn test_stalled_backend_times_out_and_fails_open() {
    let cache = faulty_cache(Fault::Stall);
    assert_fails_open(&cache).await;

    assert!(matches!(
        cache.provider().get("analysis:labels:k").await,
        Err(CacheError::Timeout(_))
    ));
    assert!(matches!(
        cache.provider().delete("analysis:labels:k").await,
        Err(CacheError::Timeout(_))
    ));
}

#[tokio::test]
async fn test_per_call_timeout_bounds_lookup() {
    let provider = CacheProvider::custom(FaultyBackend::new(Fault::Stall))
        .with_operation_timeout(Duration::from_secs(30));
    let cache = AnalysisCache::new(provider, NAMESPACE);

    let started = std::time::Instant::now();
    let value: u32 = cache
        .get_or_compute(
            AnalysisType::Ocr,
            "scan",
            &AnalysisOptions::None,
            || async { Ok::<_, std::io::Error>(4) },
            CallOptions {
                timeout: Some(Duration::from_millis(20)),
                ..CallOptions::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(value, 4);
    assert!(started.elapsed() < Duration::from_secs(5));
}
