//! # Cache Storage Layer
//!
//! Pluggable key/value storage for analysis results.
//!
//! ## Architecture
//!
//! ```text
//! CacheProvider (enum)                <- Zero-cost dispatch, per-call deadline
//!   ├── Memory(InMemoryCacheBackend)  <- Process-local, LRU + expiry sweep
//!   ├── Redis(RedisCacheBackend)      <- ConnectionManager-based async Redis
//!   ├── NoOp(NoOpCacheBackend)        <- Always-miss, always-succeed fallback
//!   └── Custom(..)                    <- Any other CacheBackend, boxed futures
//! ```
//!
//! ## Design Decisions
//!
//! - **Enum dispatch**: zero vtable overhead, one concrete type to pass around
//! - **Graceful degradation**: Redis failure → NoOp fallback, never blocks startup
//! - **SCAN for patterns**: Non-blocking key iteration (never uses KEYS)
//! - **Errors surface here**: backends return `CacheResult`; turning them
//!   into misses is the job of [`crate::analysis::AnalysisCache`]

pub mod entry;
pub mod errors;
pub mod provider;
pub mod providers;
pub mod traits;

pub use entry::{CacheEntry, CacheValue, EntryView, InvalidationFilter};
pub use errors::{CacheError, CacheResult};
pub use provider::CacheProvider;
pub use providers::{InMemoryCacheBackend, MemoryBackendConfig, NoOpCacheBackend};
pub use traits::CacheBackend;

#[cfg(feature = "cache-redis")]
pub use providers::RedisCacheBackend;
