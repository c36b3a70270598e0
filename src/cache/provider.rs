//! Cache provider with per-operation deadlines
//!
//! Uses enum dispatch for zero-cost abstraction over the concrete backends.
//! Every call is bounded by `operation_timeout`; a slow backend surfaces as
//! [`CacheError::Timeout`] instead of stalling the caller.
//!
//! Backends outside this crate plug in through [`CacheProvider::custom`],
//! which erases them behind boxed futures.

use super::entry::{CacheValue, InvalidationFilter};
use super::errors::{CacheError, CacheResult};
use super::providers::{InMemoryCacheBackend, MemoryBackendConfig, NoOpCacheBackend};
use super::traits::CacheBackend;
use crate::clock::SharedClock;
use crate::config::{AnalysisCacheConfig, BackendKind};
use crate::fingerprint::ContentFingerprint;
use crate::logging::log_cache_operation;
use crate::metrics::{CacheMetricsSnapshot, CacheStats};
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[cfg(feature = "cache-redis")]
use super::providers::RedisCacheBackend;

const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(2);

/// Object-safe view of a [`CacheBackend`]
trait ErasedBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;
    fn distributed(&self) -> bool;
    fn metrics_snapshot(&self) -> CacheMetricsSnapshot;
    fn get_boxed<'a>(&'a self, key: &'a str) -> BoxFuture<'a, CacheResult<Option<Value>>>;
    fn set_boxed<'a>(
        &'a self,
        key: &'a str,
        value: &'a CacheValue,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, CacheResult<()>>;
    fn delete_boxed<'a>(&'a self, key: &'a str) -> BoxFuture<'a, CacheResult<bool>>;
    fn invalidate_by_pattern_boxed<'a>(
        &'a self,
        prefix: &'a str,
    ) -> BoxFuture<'a, CacheResult<u64>>;
    fn invalidate_by_content_hash_boxed<'a>(
        &'a self,
        hash: &'a ContentFingerprint,
    ) -> BoxFuture<'a, CacheResult<u64>>;
    fn invalidate_matching_boxed<'a>(
        &'a self,
        filter: &'a InvalidationFilter,
    ) -> BoxFuture<'a, CacheResult<u64>>;
    fn ttl_remaining_boxed<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, CacheResult<Option<Duration>>>;
    fn stats_boxed(&self) -> BoxFuture<'_, CacheResult<CacheStats>>;
    fn health_check_boxed(&self) -> BoxFuture<'_, CacheResult<bool>>;
}

impl<B> ErasedBackend for B
where
    B: CacheBackend + fmt::Debug + 'static,
{
    fn name(&self) -> &'static str {
        self.provider_name()
    }

    fn distributed(&self) -> bool {
        self.is_distributed()
    }

    fn metrics_snapshot(&self) -> CacheMetricsSnapshot {
        self.metrics()
    }

    fn get_boxed<'a>(&'a self, key: &'a str) -> BoxFuture<'a, CacheResult<Option<Value>>> {
        Box::pin(self.get(key))
    }

    fn set_boxed<'a>(
        &'a self,
        key: &'a str,
        value: &'a CacheValue,
        ttl: Option<Duration>,
    ) -> BoxFuture<'a, CacheResult<()>> {
        Box::pin(self.set(key, value, ttl))
    }

    fn delete_boxed<'a>(&'a self, key: &'a str) -> BoxFuture<'a, CacheResult<bool>> {
        Box::pin(self.delete(key))
    }

    fn invalidate_by_pattern_boxed<'a>(
        &'a self,
        prefix: &'a str,
    ) -> BoxFuture<'a, CacheResult<u64>> {
        Box::pin(self.invalidate_by_pattern(prefix))
    }

    fn invalidate_by_content_hash_boxed<'a>(
        &'a self,
        hash: &'a ContentFingerprint,
    ) -> BoxFuture<'a, CacheResult<u64>> {
        Box::pin(self.invalidate_by_content_hash(hash))
    }

    fn invalidate_matching_boxed<'a>(
        &'a self,
        filter: &'a InvalidationFilter,
    ) -> BoxFuture<'a, CacheResult<u64>> {
        Box::pin(self.invalidate_matching(filter))
    }

    fn ttl_remaining_boxed<'a>(
        &'a self,
        key: &'a str,
    ) -> BoxFuture<'a, CacheResult<Option<Duration>>> {
        Box::pin(self.ttl_remaining(key))
    }

    fn stats_boxed(&self) -> BoxFuture<'_, CacheResult<CacheStats>> {
        Box::pin(self.stats())
    }

    fn health_check_boxed(&self) -> BoxFuture<'_, CacheResult<bool>> {
        Box::pin(self.health_check())
    }
}

/// Internal backend enum for zero-cost dispatch
#[derive(Debug, Clone)]
enum Backend {
    /// In-process map with LRU eviction
    Memory(InMemoryCacheBackend),

    /// Redis cache provider (boxed to reduce enum size)
    #[cfg(feature = "cache-redis")]
    Redis(Box<RedisCacheBackend>),

    /// No-op cache provider (always miss, always succeed)
    NoOp(NoOpCacheBackend),

    /// Any other backend, dispatched through boxed futures
    Custom(Arc<dyn ErasedBackend>),
}

impl Backend {
    fn provider_name(&self) -> &'static str {
        match self {
            Self::Memory(s) => s.provider_name(),
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.provider_name(),
            Self::NoOp(s) => s.provider_name(),
            Self::Custom(s) => s.name(),
        }
    }

    fn is_distributed(&self) -> bool {
        match self {
            Self::Memory(s) => s.is_distributed(),
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.is_distributed(),
            Self::NoOp(s) => s.is_distributed(),
            Self::Custom(s) => s.distributed(),
        }
    }

    fn metrics(&self) -> CacheMetricsSnapshot {
        match self {
            Self::Memory(s) => s.metrics(),
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.metrics(),
            Self::NoOp(s) => s.metrics(),
            Self::Custom(s) => s.metrics_snapshot(),
        }
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        match self {
            Self::Memory(s) => s.get(key).await,
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.get(key).await,
            Self::NoOp(s) => s.get(key).await,
            Self::Custom(s) => s.get_boxed(key).await,
        }
    }

    async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> CacheResult<()> {
        match self {
            Self::Memory(s) => s.set(key, value, ttl).await,
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.set(key, value, ttl).await,
            Self::NoOp(s) => s.set(key, value, ttl).await,
            Self::Custom(s) => s.set_boxed(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> CacheResult<bool> {
        match self {
            Self::Memory(s) => s.delete(key).await,
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.delete(key).await,
            Self::NoOp(s) => s.delete(key).await,
            Self::Custom(s) => s.delete_boxed(key).await,
        }
    }

    async fn invalidate_by_pattern(&self, prefix: &str) -> CacheResult<u64> {
        match self {
            Self::Memory(s) => s.invalidate_by_pattern(prefix).await,
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.invalidate_by_pattern(prefix).await,
            Self::NoOp(s) => s.invalidate_by_pattern(prefix).await,
            Self::Custom(s) => s.invalidate_by_pattern_boxed(prefix).await,
        }
    }

    async fn invalidate_by_content_hash(&self, hash: &ContentFingerprint) -> CacheResult<u64> {
        match self {
            Self::Memory(s) => s.invalidate_by_content_hash(hash).await,
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.invalidate_by_content_hash(hash).await,
            Self::NoOp(s) => s.invalidate_by_content_hash(hash).await,
            Self::Custom(s) => s.invalidate_by_content_hash_boxed(hash).await,
        }
    }

    async fn invalidate_matching(&self, filter: &InvalidationFilter) -> CacheResult<u64> {
        match self {
            Self::Memory(s) => s.invalidate_matching(filter).await,
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.invalidate_matching(filter).await,
            Self::NoOp(s) => s.invalidate_matching(filter).await,
            Self::Custom(s) => s.invalidate_matching_boxed(filter).await,
        }
    }

    async fn ttl_remaining(&self, key: &str) -> CacheResult<Option<Duration>> {
        match self {
            Self::Memory(s) => s.ttl_remaining(key).await,
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.ttl_remaining(key).await,
            Self::NoOp(s) => s.ttl_remaining(key).await,
            Self::Custom(s) => s.ttl_remaining_boxed(key).await,
        }
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        match self {
            Self::Memory(s) => s.stats().await,
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.stats().await,
            Self::NoOp(s) => s.stats().await,
            Self::Custom(s) => s.stats_boxed().await,
        }
    }

    async fn health_check(&self) -> CacheResult<bool> {
        match self {
            Self::Memory(s) => s.health_check().await,
            #[cfg(feature = "cache-redis")]
            Self::Redis(s) => s.health_check().await,
            Self::NoOp(s) => s.health_check().await,
            Self::Custom(s) => s.health_check_boxed().await,
        }
    }
}

/// Cache provider used by the rest of the crate
///
/// ## Backends
///
/// - **Memory**: In-process cache for single-instance deployments
/// - **Redis**: Distributed cache for multi-instance deployments
/// - **NoOp**: Always-miss fallback when caching is disabled, the
///   configuration is invalid or Redis is unreachable at start-up
/// - **Custom**: Any other [`CacheBackend`] implementation
///
/// Cloning is cheap and clones share the same backend state.
#[derive(Debug, Clone)]
pub struct CacheProvider {
    backend: Backend,
    operation_timeout: Duration,
}

impl CacheProvider {
    /// Create a cache provider from configuration with graceful degradation
    ///
    /// If the configuration fails validation, or Redis is configured but
    /// fails to connect, logs the problem and returns a NoOp provider
    /// instead. The system never fails to start due to cache issues.
    /// Background tasks (expiry sweep, Redis metrics sampling) are started
    /// on the current runtime.
    pub async fn from_config_graceful(config: &AnalysisCacheConfig, clock: SharedClock) -> Self {
        if let Err(e) = config.validate() {
            error!(
                error = %e,
                "Invalid cache configuration, falling back to NoOp cache (graceful degradation)"
            );
            return Self {
                backend: Backend::NoOp(NoOpCacheBackend::new()),
                operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            };
        }

        let backend = Self::create_backend(config, clock).await;
        Self {
            backend,
            operation_timeout: config.operation_timeout(),
        }
    }

    async fn create_backend(config: &AnalysisCacheConfig, clock: SharedClock) -> Backend {
        if !config.enabled {
            info!("Analysis cache disabled by configuration");
            return Backend::NoOp(NoOpCacheBackend::new());
        }

        match config.backend {
            BackendKind::Memory => {
                let memory_config = MemoryBackendConfig {
                    default_ttl: config.default_ttl(),
                    max_memory_bytes: config.max_memory_bytes,
                    compression_threshold: config.compression_threshold(),
                    sweep_interval: config.sweep_interval(),
                };
                let backend = InMemoryCacheBackend::new(memory_config, clock);
                backend.start_sweeper();
                info!(
                    backend = "memory",
                    max_memory_bytes = config.max_memory_bytes,
                    ttl_seconds = config.default_ttl_seconds,
                    "In-memory cache provider initialized successfully"
                );
                Backend::Memory(backend)
            }
            BackendKind::Redis => Self::create_redis_backend(config, clock).await,
            BackendKind::NoOp => {
                info!("NoOp cache provider selected by configuration");
                Backend::NoOp(NoOpCacheBackend::new())
            }
        }
    }

    /// Attempt to create a Redis backend, falling back to NoOp on failure
    #[cfg(feature = "cache-redis")]
    async fn create_redis_backend(config: &AnalysisCacheConfig, clock: SharedClock) -> Backend {
        let Some(redis_config) = &config.redis else {
            warn!("Redis cache enabled but no [redis] config found, falling back to NoOp");
            return Backend::NoOp(NoOpCacheBackend::new());
        };

        let connect = RedisCacheBackend::from_config(
            redis_config,
            &config.namespace,
            config.default_ttl(),
            clock,
        );
        // Connection establishment gets the same deadline as any operation
        let result = match tokio::time::timeout(config.operation_timeout(), connect).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Timeout(format!(
                "Redis connection not established within {}ms",
                config.operation_timeout_ms
            ))),
        };

        match result {
            Ok(service) => {
                service.start_metrics_sampler(redis_config.metrics_sample_interval());
                info!(
                    backend = "redis",
                    "Distributed cache provider initialized successfully"
                );
                Backend::Redis(Box::new(service))
            }
            Err(e) => {
                warn!(
                    error = %e,
                    "Failed to connect to Redis, falling back to NoOp cache (graceful degradation)"
                );
                Backend::NoOp(NoOpCacheBackend::new())
            }
        }
    }

    /// Fallback when cache-redis feature is not enabled
    #[cfg(not(feature = "cache-redis"))]
    async fn create_redis_backend(_config: &AnalysisCacheConfig, _clock: SharedClock) -> Backend {
        warn!("Redis cache backend requested but 'cache-redis' feature not enabled, using NoOp");
        Backend::NoOp(NoOpCacheBackend::new())
    }

    /// Wrap an existing in-process backend (no sweeper is started)
    pub fn memory(backend: InMemoryCacheBackend) -> Self {
        Self {
            backend: Backend::Memory(backend),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Wrap an existing Redis backend
    #[cfg(feature = "cache-redis")]
    pub fn redis(backend: RedisCacheBackend) -> Self {
        Self {
            backend: Backend::Redis(Box::new(backend)),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Create a NoOp provider (for explicit opt-out or testing)
    pub fn noop() -> Self {
        Self {
            backend: Backend::NoOp(NoOpCacheBackend::new()),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    /// Wrap any other backend implementation
    pub fn custom<B>(backend: B) -> Self
    where
        B: CacheBackend + fmt::Debug + 'static,
    {
        Self {
            backend: Backend::Custom(Arc::new(backend)),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
        }
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = timeout;
        self
    }

    /// Check if caching is actually enabled (not NoOp)
    pub fn is_enabled(&self) -> bool {
        !matches!(self.backend, Backend::NoOp(_))
    }

    /// Check if this provider shares state across processes
    pub fn is_distributed(&self) -> bool {
        self.backend.is_distributed()
    }

    pub fn provider_name(&self) -> &'static str {
        self.backend.provider_name()
    }

    /// The in-process backend, when that is what is configured
    pub fn as_memory(&self) -> Option<&InMemoryCacheBackend> {
        match &self.backend {
            Backend::Memory(s) => Some(s),
            _ => None,
        }
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.backend.metrics()
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = CacheResult<T>>,
    ) -> CacheResult<T> {
        match tokio::time::timeout(self.operation_timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                let details = format!(
                    "{operation} exceeded {}ms",
                    self.operation_timeout.as_millis()
                );
                warn!(
                    operation = operation,
                    provider = self.provider_name(),
                    timeout_ms = self.operation_timeout.as_millis() as u64,
                    "Cache operation timed out"
                );
                log_cache_operation(
                    operation,
                    self.provider_name(),
                    None,
                    "timeout",
                    None,
                    Some(&details),
                );
                Err(CacheError::Timeout(details))
            }
        }
    }

    fn log_purge(&self, operation: &str, target: Option<&str>, result: &CacheResult<u64>) {
        match result {
            Ok(affected) => log_cache_operation(
                operation,
                self.provider_name(),
                target,
                "success",
                Some(*affected),
                None,
            ),
            Err(e) => log_cache_operation(
                operation,
                self.provider_name(),
                target,
                "error",
                None,
                Some(&e.to_string()),
            ),
        }
    }

    pub async fn get(&self, key: &str) -> CacheResult<Option<Value>> {
        self.bounded("get", self.backend.get(key)).await
    }

    pub async fn set(&self, key: &str, value: &CacheValue, ttl: Option<Duration>) -> CacheResult<()> {
        self.bounded("set", self.backend.set(key, value, ttl)).await
    }

    pub async fn delete(&self, key: &str) -> CacheResult<bool> {
        self.bounded("delete", self.backend.delete(key)).await
    }

    pub async fn invalidate_by_pattern(&self, prefix: &str) -> CacheResult<u64> {
        let result = self
            .bounded("invalidate_by_pattern", self.backend.invalidate_by_pattern(prefix))
            .await;
        self.log_purge("invalidate_by_pattern", Some(prefix), &result);
        result
    }

    pub async fn invalidate_by_content_hash(&self, hash: &ContentFingerprint) -> CacheResult<u64> {
        let result = self
            .bounded(
                "invalidate_by_content_hash",
                self.backend.invalidate_by_content_hash(hash),
            )
            .await;
        self.log_purge("invalidate_by_content_hash", Some(hash.as_str()), &result);
        result
    }

    pub async fn invalidate_matching(&self, filter: &InvalidationFilter) -> CacheResult<u64> {
        let result = self
            .bounded("invalidate_matching", self.backend.invalidate_matching(filter))
            .await;
        self.log_purge("invalidate_matching", filter.key_prefix.as_deref(), &result);
        result
    }

    pub async fn ttl_remaining(&self, key: &str) -> CacheResult<Option<Duration>> {
        self.bounded("ttl_remaining", self.backend.ttl_remaining(key))
            .await
    }

    pub async fn stats(&self) -> CacheResult<CacheStats> {
        self.bounded("stats", self.backend.stats()).await
    }

    pub async fn health_check(&self) -> CacheResult<bool> {
        self.bounded("health_check", self.backend.health_check())
            .await
    }
}
