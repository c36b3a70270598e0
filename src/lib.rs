#![allow(clippy::doc_markdown)] // Allow technical terms like Redis, SHA-256 in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Analysis Cache
//!
//! Result caching for expensive content analyses (sentiment, keywords,
//! entities, image labels and friends).
//!
//! ## Overview
//!
//! Analysis results are addressed by the kind of analysis, a SHA-256
//! fingerprint of the analysed content and a fingerprint of the options used.
//! Identical requests are served from cache; concurrent identical requests
//! share a single computation.
//!
//! ## Architecture
//!
//! ```text
//! AnalysisCache ──► CacheProvider ──┬─► InMemoryCacheBackend (LRU, TTL, gzip)
//!       ▲                           ├─► RedisCacheBackend    (shared, namespaced)
//!       │                           └─► NoOpCacheBackend     (disabled / degraded)
//!       │
//! InvalidationRuleEngine ──► rules + Scheduler
//! ```
//!
//! ## Module Organization
//!
//! - [`analysis`] - Typed cache facade with in-flight de-duplication
//! - [`cache`] - Backend trait, providers and entry encoding
//! - [`invalidation`] - Rules, triggers, schedules and the rule engine
//! - [`config`] - Layered configuration (file + environment)
//! - [`fingerprint`] - Content fingerprints and canonical JSON
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use analysis_cache::{AnalysisCache, AnalysisOptions, AnalysisType, CallOptions, ConfigLoader, SystemClock};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigLoader::load_from_env()?;
//! let cache = AnalysisCache::from_config(&config, SystemClock::shared()).await;
//!
//! let score: f64 = cache
//!     .get_or_compute(
//!         AnalysisType::Sentiment,
//!         "I love this product",
//!         &AnalysisOptions::sentiment_language("en"),
//!         || async { Ok::<_, std::io::Error>(0.92) },
//!         CallOptions::default(),
//!     )
//!     .await?;
//! # let _ = score;
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod invalidation;
pub mod logging;
pub mod metrics;
pub mod types;

pub use analysis::{AnalysisCache, CallOptions, ComputeError};
pub use cache::{
    CacheBackend, CacheEntry, CacheError, CacheProvider, CacheResult, CacheValue,
    InMemoryCacheBackend, InvalidationFilter, MemoryBackendConfig, NoOpCacheBackend,
};
#[cfg(feature = "cache-redis")]
pub use cache::RedisCacheBackend;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{
    AnalysisCacheConfig, BackendKind, ConfigLoader, ConfigResult, ConfigurationError,
    InvalidationConfig, RedisConfig,
};
pub use fingerprint::{canonical_json, Content, ContentFingerprint};
pub use invalidation::{
    default_rules, EngineStats, Frequency, InvalidationContext, InvalidationResult,
    InvalidationRule, InvalidationRuleEngine, InvalidationStrategy, InvalidationTrigger,
    RuleConditions, RuleError, RuleId, RulePatch, RuleResult, RuleSpec, Schedule,
};
pub use metrics::{CacheMetrics, CacheMetricsSnapshot, CacheStats};
pub use types::{AnalysisOptions, AnalysisType, CacheKey};
