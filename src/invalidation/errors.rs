//! Rule configuration and execution errors

use super::rule::RuleId;
use crate::cache::CacheError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RuleError {
    /// Malformed schedule (time format, day of week, frequency mismatch)
    #[error("Invalid schedule: {0}")]
    InvalidSchedule(String),

    /// A condition that cannot be evaluated
    #[error("Invalid rule condition: {0}")]
    InvalidCondition(String),

    #[error("Rule not found: {0}")]
    RuleNotFound(RuleId),

    /// The backend failed while the rule was purging entries
    #[error(transparent)]
    Cache(#[from] CacheError),
}

pub type RuleResult<T> = Result<T, RuleError>;
