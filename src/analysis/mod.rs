//! # Analysis Cache
//!
//! The entry point analysis services call. Wraps a [`crate::cache::CacheProvider`]
//! with typed get/set, fail-open error handling and in-flight de-duplication
//! for [`AnalysisCache::get_or_compute`].

mod cache;
mod errors;
mod pending;

pub use cache::{AnalysisCache, CallOptions};
pub use errors::ComputeError;
