//! Crate-level error re-exports and shared helpers.

use std::any::Any;

pub use crate::analysis::ComputeError;
pub use crate::cache::{CacheError, CacheResult};
pub use crate::config::{ConfigResult, ConfigurationError};
pub use crate::invalidation::{RuleError, RuleResult};

/// Best-effort text of a caught panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        let literal: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(literal.as_ref()), "boom");

        let owned: Box<dyn Any + Send> = Box::new(String::from("formatted boom"));
        assert_eq!(panic_message(owned.as_ref()), "formatted boom");

        let other: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(other.as_ref()), "Unknown panic");
    }
}
