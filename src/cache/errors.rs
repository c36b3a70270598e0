//! Cache error types

use thiserror::Error;

/// Errors that can occur during cache backend operations
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Failed to connect to cache backend
    #[error("Cache connection error: {0}")]
    ConnectionError(String),

    /// Failed to serialize, compress or decode a cache value
    #[error("Cache serialization error: {0}")]
    SerializationError(String),

    /// Cache operation exceeded its deadline
    #[error("Cache operation timed out: {0}")]
    Timeout(String),

    /// Generic backend error
    #[error("Cache backend error: {0}")]
    BackendError(String),

    /// A single value is larger than the whole memory budget
    #[error("Cache value of {size} bytes exceeds memory budget of {budget} bytes")]
    CapacityExceeded { size: u64, budget: u64 },
}

impl From<serde_json::Error> for CacheError {
    fn from(error: serde_json::Error) -> Self {
        CacheError::SerializationError(error.to_string())
    }
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;
