//! # Configuration
//!
//! Typed configuration for the cache, its backends and the invalidation
//! engine. Every field has a default, so an empty file (or no file at all)
//! yields a working in-process cache.
//!
//! ```toml
//! enabled = true
//! backend = "redis"
//! namespace = "analysis"
//! default_ttl_seconds = 3600
//!
//! [redis]
//! url = "redis://localhost:6379"
//!
//! [invalidation]
//! history_limit = 1000
//! ```
//!
//! See [`ConfigLoader`] for how files and environment variables are layered.

pub mod error;
pub mod loader;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigLoader;

/// Which storage backend the provider should build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process-local map with LRU eviction
    #[default]
    Memory,
    /// Shared Redis store
    Redis,
    /// Always miss, always succeed
    NoOp,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Memory => "memory",
            BackendKind::Redis => "redis",
            BackendKind::NoOp => "noop",
        };
        f.write_str(name)
    }
}

/// Root configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisCacheConfig {
    /// Global switch; `false` selects the NoOp backend regardless of `backend`
    pub enabled: bool,
    pub backend: BackendKind,
    /// Prefix of every key; must be non-empty and free of `:`
    pub namespace: String,
    pub default_ttl_seconds: u64,
    /// Memory budget of the in-process backend
    pub max_memory_bytes: u64,
    /// Period of the in-process active expiry sweep
    pub sweep_interval_seconds: u64,
    /// Payloads above this many bytes are stored compressed; `None` disables
    pub compression_threshold_bytes: Option<u64>,
    /// Deadline applied to every backend call
    pub operation_timeout_ms: u64,
    pub redis: Option<RedisConfig>,
    pub invalidation: InvalidationConfig,
}

impl Default for AnalysisCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: BackendKind::Memory,
            namespace: "analysis".to_string(),
            default_ttl_seconds: 3600,
            max_memory_bytes: 100 * 1024 * 1024,
            sweep_interval_seconds: 60,
            compression_threshold_bytes: Some(64 * 1024),
            operation_timeout_ms: 2000,
            redis: None,
            invalidation: InvalidationConfig::default(),
        }
    }
}

impl AnalysisCacheConfig {
    /// Check value ranges the type system cannot express
    pub fn validate(&self) -> ConfigResult<()> {
        if self.namespace.is_empty() {
            return Err(ConfigurationError::invalid_value(
                "namespace",
                &self.namespace,
                "must not be empty",
            ));
        }
        if self.namespace.contains(':') {
            return Err(ConfigurationError::invalid_value(
                "namespace",
                &self.namespace,
                "must not contain ':' (used as the key separator)",
            ));
        }

        let positive = [
            ("default_ttl_seconds", self.default_ttl_seconds),
            ("max_memory_bytes", self.max_memory_bytes),
            ("sweep_interval_seconds", self.sweep_interval_seconds),
            ("operation_timeout_ms", self.operation_timeout_ms),
            (
                "invalidation.scheduler_tick_seconds",
                self.invalidation.scheduler_tick_seconds,
            ),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    value,
                    "must be greater than zero",
                ));
            }
        }

        if self.invalidation.history_limit == 0 {
            return Err(ConfigurationError::invalid_value(
                "invalidation.history_limit",
                0,
                "must be greater than zero",
            ));
        }

        if let Some(redis) = &self.redis {
            redis.validate()?;
        }
        if self.enabled && self.backend == BackendKind::Redis && self.redis.is_none() {
            // The provider would silently degrade to NoOp
            return Err(ConfigurationError::invalid_value(
                "redis",
                "<missing>",
                "backend = \"redis\" requires a [redis] section",
            ));
        }

        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn compression_threshold(&self) -> Option<usize> {
        self.compression_threshold_bytes
            .map(|bytes| usize::try_from(bytes).unwrap_or(usize::MAX))
    }
}

/// Redis connection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub url: String,
    /// Period for copying server memory and latency figures into metrics
    pub metrics_sample_interval_seconds: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            metrics_sample_interval_seconds: 30,
        }
    }
}

impl RedisConfig {
    fn validate(&self) -> ConfigResult<()> {
        if !(self.url.starts_with("redis://")
            || self.url.starts_with("rediss://")
            || self.url.starts_with("redis+unix://")
            || self.url.starts_with("unix://"))
        {
            return Err(ConfigurationError::invalid_value(
                "redis.url",
                crate::logging::redact_url(&self.url),
                "expected a redis://, rediss:// or unix:// URL",
            ));
        }
        if self.metrics_sample_interval_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "redis.metrics_sample_interval_seconds",
                0,
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn metrics_sample_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_sample_interval_seconds)
    }
}

/// Invalidation engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InvalidationConfig {
    /// Most recent results kept in the execution history
    pub history_limit: usize,
    /// How often the scheduler driver checks for due rules
    pub scheduler_tick_seconds: u64,
    /// Install the content-update, daily cleanup and manual rules at start-up
    pub install_default_rules: bool,
}

impl Default for InvalidationConfig {
    fn default() -> Self {
        Self {
            history_limit: 1000,
            scheduler_tick_seconds: 30,
            install_default_rules: true,
        }
    }
}

impl InvalidationConfig {
    pub fn scheduler_tick(&self) -> Duration {
        Duration::from_secs(self.scheduler_tick_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AnalysisCacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.default_ttl(), Duration::from_secs(3600));
        assert_eq!(config.compression_threshold(), Some(64 * 1024));
    }

    #[test]
    fn test_namespace_validation() {
        let empty = AnalysisCacheConfig {
            namespace: String::new(),
            ..AnalysisCacheConfig::default()
        };
        assert!(matches!(
            empty.validate(),
            Err(ConfigurationError::InvalidValue { ref field, .. }) if field == "namespace"
        ));

        let colon = AnalysisCacheConfig {
            namespace: "a:b".to_string(),
            ..AnalysisCacheConfig::default()
        };
        assert!(colon.validate().is_err());
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = AnalysisCacheConfig {
            default_ttl_seconds: 0,
            ..AnalysisCacheConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AnalysisCacheConfig {
            invalidation: InvalidationConfig {
                history_limit: 0,
                ..InvalidationConfig::default()
            },
            ..AnalysisCacheConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_redis_backend_requires_section() {
        let config = AnalysisCacheConfig {
            backend: BackendKind::Redis,
            ..AnalysisCacheConfig::default()
        };
        assert!(config.validate().is_err());

        let config = AnalysisCacheConfig {
            backend: BackendKind::Redis,
            redis: Some(RedisConfig::default()),
            ..AnalysisCacheConfig::default()
        };
        assert!(config.validate().is_ok());

        let config = AnalysisCacheConfig {
            backend: BackendKind::Redis,
            redis: Some(RedisConfig {
                url: "http://localhost".to_string(),
                ..RedisConfig::default()
            }),
            ..AnalysisCacheConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backend_kind_serde() {
        let kind: BackendKind = serde_json::from_str("\"noop\"").unwrap();
        assert_eq!(kind, BackendKind::NoOp);
        assert_eq!(BackendKind::Redis.to_string(), "redis");
    }
}
