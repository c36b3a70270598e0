//! Errors surfaced by `get_or_compute`

use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Why `get_or_compute` produced no value
///
/// Cache-layer failures never appear here; they degrade to a recomputation.
/// Cloneable so every caller joined on one computation receives the outcome.
#[derive(Debug, Clone, Error)]
pub enum ComputeError {
    /// The compute function returned an error; the original is kept intact
    #[error("{0}")]
    Failed(Arc<dyn StdError + Send + Sync>),

    /// The computation panicked or its task was cancelled
    #[error("Analysis computation aborted: {0}")]
    Aborted(String),

    /// The result could not be converted to or from its cached JSON form
    #[error("Analysis result serialization error: {0}")]
    Serialization(String),
}

impl ComputeError {
    pub(crate) fn failed(error: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Failed(Arc::from(error.into()))
    }

    /// Borrow the compute function's own error as its concrete type
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            Self::Failed(inner) => inner.downcast_ref::<E>(),
            _ => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl From<serde_json::Error> for ComputeError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Error, PartialEq)]
    #[error("model unavailable: {0}")]
    struct ModelUnavailable(String);

    #[test]
    fn test_failed_keeps_original_error() {
        let error = ComputeError::failed(ModelUnavailable("sentiment-v2".to_string()));
        assert!(error.is_failed());
        assert_eq!(error.to_string(), "model unavailable: sentiment-v2");
        assert_eq!(
            error.downcast_ref::<ModelUnavailable>(),
            Some(&ModelUnavailable("sentiment-v2".to_string()))
        );

        let cloned = error.clone();
        assert!(cloned.downcast_ref::<ModelUnavailable>().is_some());
    }

    #[test]
    fn test_failed_from_string_and_anyhow() {
        let from_str = ComputeError::failed("plain message");
        assert_eq!(from_str.to_string(), "plain message");

        let from_anyhow = ComputeError::failed(anyhow::anyhow!("wrapped"));
        assert_eq!(from_anyhow.to_string(), "wrapped");
    }

    #[test]
    fn test_aborted_is_not_downcastable() {
        let error = ComputeError::Aborted("panicked".to_string());
        assert!(!error.is_failed());
        assert!(error.downcast_ref::<ModelUnavailable>().is_none());
    }
}
