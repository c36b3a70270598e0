//! Typed, fail-open facade over the cache provider.

use super::errors::ComputeError;
use super::pending::{PendingTable, Reservation};
use crate::cache::{CacheProvider, CacheResult, CacheValue, InvalidationFilter};
use crate::clock::SharedClock;
use crate::config::AnalysisCacheConfig;
use crate::error::panic_message;
use crate::fingerprint::{Content, ContentFingerprint};
use crate::metrics::{CacheMetricsSnapshot, CacheStats};
use crate::types::{AnalysisOptions, AnalysisType, CacheKey};
use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::borrow::Cow;
use std::error::Error as StdError;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Per-call overrides for [`AnalysisCache::get_or_compute`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOptions {
    /// `false` bypasses the cache entirely: no lookup, no store, no de-dup
    pub enabled: bool,
    /// TTL for the stored result; `None` uses the backend default
    pub ttl: Option<Duration>,
    /// Deadline for each cache operation of this call
    pub timeout: Option<Duration>,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: None,
            timeout: None,
        }
    }
}

impl CallOptions {
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

#[derive(Debug)]
struct Inner {
    provider: CacheProvider,
    namespace: String,
    pending: Arc<PendingTable>,
}

impl Inner {
    fn provider(&self, timeout: Option<Duration>) -> Cow<'_, CacheProvider> {
        match timeout {
            Some(timeout) => Cow::Owned(self.provider.clone().with_operation_timeout(timeout)),
            None => Cow::Borrowed(&self.provider),
        }
    }

    async fn lookup(&self, key: &CacheKey, timeout: Option<Duration>) -> Option<Value> {
        match self.provider(timeout).get(key.as_str()).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    async fn store(
        &self,
        key: &CacheKey,
        payload: Value,
        ttl: Option<Duration>,
        timeout: Option<Duration>,
    ) -> bool {
        let value = CacheValue::new(payload, Some(key.content_hash.clone()));
        match self.provider(timeout).set(key.as_str(), &value, ttl).await {
            Ok(()) => true,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache store failed, result not cached");
                false
            }
        }
    }
}

/// Content-addressed cache of analysis results
///
/// Keys are derived from the analysis type, a fingerprint of the content and
/// a digest of the options. Backend failures never reach the caller: reads
/// degrade to misses, writes and purges to `false` / `0`.
///
/// Cloning is cheap; clones share the backend and the in-flight table.
#[derive(Debug, Clone)]
pub struct AnalysisCache {
    inner: Arc<Inner>,
}

impl AnalysisCache {
    pub fn new(provider: CacheProvider, namespace: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                namespace: namespace.into(),
                pending: Arc::new(PendingTable::default()),
            }),
        }
    }

    /// Build the configured provider (degrading to NoOp on failure) and wrap it
    pub async fn from_config(config: &AnalysisCacheConfig, clock: SharedClock) -> Self {
        let provider = CacheProvider::from_config_graceful(config, clock).await;
        Self::new(provider, config.namespace.clone())
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn provider(&self) -> &CacheProvider {
        &self.inner.provider
    }

    /// The key a request would be stored under
    pub fn key_for<'a>(
        &self,
        analysis_type: AnalysisType,
        content: impl Into<Content<'a>>,
        options: &AnalysisOptions,
    ) -> CacheKey {
        CacheKey::new(&self.inner.namespace, analysis_type, content.into(), options)
    }

    /// Cached result, or `None` on a miss, a backend failure or a payload
    /// that no longer deserializes as `T`
    pub async fn get<'a, T: DeserializeOwned>(
        &self,
        analysis_type: AnalysisType,
        content: impl Into<Content<'a>>,
        options: &AnalysisOptions,
    ) -> Option<T> {
        let key = self.key_for(analysis_type, content, options);
        let value = self.inner.lookup(&key, None).await?;
        decode_cached(&key, value)
    }

    /// Store a result; `false` means it was not cached
    pub async fn set<'a, T: Serialize + ?Sized>(
        &self,
        analysis_type: AnalysisType,
        content: impl Into<Content<'a>>,
        options: &AnalysisOptions,
        value: &T,
        ttl: Option<Duration>,
    ) -> bool {
        let key = self.key_for(analysis_type, content, options);
        let payload = match serde_json::to_value(value) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(key = %key, error = %e, "Analysis result is not serializable, not cached");
                return false;
            }
        };
        self.inner.store(&key, payload, ttl, None).await
    }

    /// Return the cached result or compute it, running `compute` at most
    /// once at a time per key
    ///
    /// Concurrent callers for the same key share the owner's computation.
    /// The computation runs on its own task: dropping every caller does not
    /// cancel it, and a successful result is still cached. Only successful
    /// results are cached. Errors from `compute` propagate unchanged as
    /// [`ComputeError::Failed`].
    ///
    /// `compute` is only invoked by the caller that owns the key's slot,
    /// after the slot is registered and without any lock held, so it may
    /// call back into this cache.
    pub async fn get_or_compute<'a, T, F, Fut, E>(
        &self,
        analysis_type: AnalysisType,
        content: impl Into<Content<'a>>,
        options: &AnalysisOptions,
        compute: F,
        call: CallOptions,
    ) -> Result<T, ComputeError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>> + 'static,
    {
        if !call.enabled {
            debug!(analysis_type = %analysis_type, "Cache bypassed for this call");
            return compute().await.map_err(ComputeError::failed);
        }

        let key = self.key_for(analysis_type, content, options);

        if let Some(value) = self.inner.lookup(&key, call.timeout).await {
            if let Some(hit) = decode_cached(&key, value) {
                return Ok(hit);
            }
        }

        let (outcome, reservation) = self.inner.pending.join_or_reserve(key.as_str());
        match reservation {
            Some(reservation) => {
                // Released with the reservation if `compute` unwinds
                let computation = compute();
                self.spawn_computation(key, reservation, computation, call.ttl, call.timeout);
            }
            None => debug!(key = %key, "Joined in-flight computation"),
        }

        let value = outcome.await?;
        Ok(serde_json::from_value(value)?)
    }

    fn spawn_computation<T, Fut, E>(
        &self,
        key: CacheKey,
        reservation: Reservation,
        computation: Fut,
        ttl: Option<Duration>,
        timeout: Option<Duration>,
    ) where
        T: Serialize + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Into<Box<dyn StdError + Send + Sync>> + 'static,
    {
        let inner = Arc::clone(&self.inner);

        // A cancelled task drops the reservation, which resolves waiters as aborted
        tokio::spawn(async move {
            debug!(key = %key, "Computing analysis result");

            let outcome = match AssertUnwindSafe(computation).catch_unwind().await {
                Ok(Ok(result)) => serde_json::to_value(&result).map_err(ComputeError::from),
                Ok(Err(e)) => Err(ComputeError::failed(e)),
                Err(panic) => Err(ComputeError::Aborted(format!(
                    "computation panicked: {}",
                    panic_message(panic.as_ref())
                ))),
            };

            match &outcome {
                Ok(payload) => {
                    inner.store(&key, payload.clone(), ttl, timeout).await;
                }
                Err(e) => {
                    debug!(key = %key, error = %e, "Computation failed, nothing cached");
                }
            }

            // Stored before the slot is released, so late callers hit the cache
            reservation.complete(outcome);
        });
    }

    /// Delete one cached result; `false` if absent or the backend failed
    pub async fn invalidate<'a>(
        &self,
        analysis_type: AnalysisType,
        content: impl Into<Content<'a>>,
        options: &AnalysisOptions,
    ) -> bool {
        let key = self.key_for(analysis_type, content, options);
        match self.inner.provider.delete(key.as_str()).await {
            Ok(existed) => existed,
            Err(e) => {
                warn!(key = %key, error = %e, "Cache delete failed");
                false
            }
        }
    }

    /// Delete every cached result of one analysis type
    pub async fn invalidate_by_type(&self, analysis_type: AnalysisType) -> u64 {
        self.try_invalidate_by_type(analysis_type, None)
            .await
            .unwrap_or_else(|e| {
                warn!(analysis_type = %analysis_type, error = %e, "Type invalidation failed");
                0
            })
    }

    /// Like [`Self::invalidate_by_type`] but reports backend failures
    ///
    /// `filter` narrows the purge further (age, access count, content); its
    /// own key prefix, if any, is replaced by the type's prefix.
    pub async fn try_invalidate_by_type(
        &self,
        analysis_type: AnalysisType,
        filter: Option<&InvalidationFilter>,
    ) -> CacheResult<u64> {
        let prefix = CacheKey::type_prefix(&self.inner.namespace, analysis_type);
        let count = match filter {
            Some(filter) if !filter.is_prefix_only() => {
                let scoped = InvalidationFilter {
                    key_prefix: Some(prefix),
                    ..filter.clone()
                };
                self.inner.provider.invalidate_matching(&scoped).await?
            }
            _ => self.inner.provider.invalidate_by_pattern(&prefix).await?,
        };

        debug!(analysis_type = %analysis_type, invalidated = count, "Invalidated analysis type");
        Ok(count)
    }

    /// Delete every cached analysis of one piece of content
    pub async fn invalidate_content<'a>(&self, content: impl Into<Content<'a>>) -> u64 {
        let hash = ContentFingerprint::of(content);
        self.try_invalidate_content_hash(&hash)
            .await
            .unwrap_or_else(|e| {
                warn!(content_hash = %hash.short(), error = %e, "Content invalidation failed");
                0
            })
    }

    pub async fn try_invalidate_content_hash(&self, hash: &ContentFingerprint) -> CacheResult<u64> {
        let filter = InvalidationFilter {
            key_prefix: Some(CacheKey::namespace_prefix(&self.inner.namespace)),
            content_hash: Some(hash.clone()),
            ..InvalidationFilter::default()
        };
        self.inner.provider.invalidate_matching(&filter).await
    }

    /// Entry and traffic statistics; counters only if the backend fails
    pub async fn stats(&self) -> CacheStats {
        match self.inner.provider.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "Cache stats unavailable");
                CacheStats::from_parts(
                    self.inner.provider.provider_name(),
                    0,
                    0,
                    None,
                    None,
                    &self.inner.provider.metrics(),
                )
            }
        }
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.inner.provider.metrics()
    }

    pub async fn health_check(&self) -> bool {
        self.inner.provider.health_check().await.unwrap_or(false)
    }

    /// Number of computations currently in flight
    pub fn in_flight(&self) -> usize {
        self.inner.pending.len()
    }
}

fn decode_cached<T: DeserializeOwned>(key: &CacheKey, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!(key = %key, error = %e, "Cached payload has an unexpected shape, treating as miss");
            None
        }
    }
}
