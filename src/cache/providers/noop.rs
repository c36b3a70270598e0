//! No-op cache provider
//!
//! Always misses, always succeeds. Used when caching is disabled or when the
//! distributed store is unavailable at start-up (graceful degradation).

use crate::cache::entry::{CacheValue, InvalidationFilter};
use crate::cache::errors::CacheResult;
use crate::cache::traits::CacheBackend;
use crate::fingerprint::ContentFingerprint;
use crate::metrics::{CacheMetrics, CacheMetricsSnapshot, CacheStats};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// No-op cache backend that never stores anything
///
/// Lookups still count as misses so hit-rate dashboards stay honest.
#[derive(Debug, Clone, Default)]
pub struct NoOpCacheBackend {
    metrics: Arc<CacheMetrics>,
}

impl NoOpCacheBackend {
    /// Create a new no-op cache backend
    pub fn new() -> Self {
        Self::default()
    }
}

impl CacheBackend for NoOpCacheBackend {
    async fn get(&self, _key: &str) -> CacheResult<Option<Value>> {
        self.metrics.record_miss();
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &CacheValue, _ttl: Option<Duration>) -> CacheResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> CacheResult<bool> {
        Ok(false)
    }

    async fn invalidate_by_pattern(&self, _prefix: &str) -> CacheResult<u64> {
        Ok(0)
    }

    async fn invalidate_by_content_hash(&self, _content_hash: &ContentFingerprint) -> CacheResult<u64> {
        Ok(0)
    }

    async fn invalidate_matching(&self, _filter: &InvalidationFilter) -> CacheResult<u64> {
        Ok(0)
    }

    async fn ttl_remaining(&self, _key: &str) -> CacheResult<Option<Duration>> {
        Ok(None)
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        Ok(CacheStats::from_parts(
            self.provider_name(),
            0,
            0,
            None,
            None,
            &self.metrics.snapshot(),
        ))
    }

    fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn health_check(&self) -> CacheResult<bool> {
        Ok(true)
    }

    fn provider_name(&self) -> &'static str {
        "noop"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_get_returns_none() {
        let backend = NoOpCacheBackend::new();
        assert_eq!(backend.get("any_key").await.unwrap(), None);
        assert_eq!(backend.metrics().misses, 1);
    }

    #[tokio::test]
    async fn test_noop_set_succeeds_but_stores_nothing() {
        let backend = NoOpCacheBackend::new();
        backend
            .set("key", &CacheValue::new(json!("value"), None), Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert_eq!(backend.get("key").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_noop_invalidations_return_zero() {
        let backend = NoOpCacheBackend::new();
        assert!(!backend.delete("key").await.unwrap());
        assert_eq!(backend.invalidate_by_pattern("prefix:").await.unwrap(), 0);
        assert_eq!(
            backend
                .invalidate_by_content_hash(&ContentFingerprint::of("x"))
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_noop_health_check_and_name() {
        let backend = NoOpCacheBackend::new();
        assert!(backend.health_check().await.unwrap());
        assert_eq!(backend.provider_name(), "noop");
        assert!(!backend.is_distributed());
    }
}
