//! Cache backend trait definition

use super::entry::{CacheValue, InvalidationFilter};
use super::errors::CacheResult;
use crate::fingerprint::ContentFingerprint;
use crate::metrics::{CacheMetricsSnapshot, CacheStats};
use serde_json::Value;
use std::future::Future;
use std::time::Duration;

/// Trait defining cache backend operations
///
/// Implemented by the in-process, Redis and NoOp providers. Every operation
/// is async and returns `CacheResult`; deciding what a failure means for the
/// caller is left to [`crate::analysis::AnalysisCache`].
pub trait CacheBackend: Send + Sync {
    /// Get a live value by key
    ///
    /// Returns `Ok(None)` on a miss, including entries found expired.
    fn get(&self, key: &str) -> impl Future<Output = CacheResult<Option<Value>>> + Send;

    /// Store a value, always overwriting. `None` uses the configured default TTL.
    fn set(
        &self,
        key: &str,
        value: &CacheValue,
        ttl: Option<Duration>,
    ) -> impl Future<Output = CacheResult<()>> + Send;

    /// Delete one key, returning whether it existed
    fn delete(&self, key: &str) -> impl Future<Output = CacheResult<bool>> + Send;

    /// Delete every key starting with `prefix`
    fn invalidate_by_pattern(&self, prefix: &str)
        -> impl Future<Output = CacheResult<u64>> + Send;

    /// Delete every entry computed from the given content
    fn invalidate_by_content_hash(
        &self,
        content_hash: &ContentFingerprint,
    ) -> impl Future<Output = CacheResult<u64>> + Send;

    /// Delete every entry the filter matches
    fn invalidate_matching(
        &self,
        filter: &InvalidationFilter,
    ) -> impl Future<Output = CacheResult<u64>> + Send;

    /// Remaining lifetime of a key, `None` when absent
    fn ttl_remaining(&self, key: &str)
        -> impl Future<Output = CacheResult<Option<Duration>>> + Send;

    /// Entry and traffic statistics
    fn stats(&self) -> impl Future<Output = CacheResult<CacheStats>> + Send;

    /// Operation counters
    fn metrics(&self) -> CacheMetricsSnapshot;

    /// Check if the backend is reachable
    fn health_check(&self) -> impl Future<Output = CacheResult<bool>> + Send;

    /// Name of the provider, for logs and stats
    fn provider_name(&self) -> &'static str;

    /// Whether state is shared across processes
    fn is_distributed(&self) -> bool {
        false
    }
}
