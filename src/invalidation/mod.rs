//! # Rule-driven invalidation
//!
//! Rules decide which cached analyses to drop in response to triggers such as
//! content updates, user requests or maintenance windows. Scheduled rules are
//! fired by the engine's timer driver.
//!
//! ```text
//! trigger ──► InvalidationRuleEngine ──► matching rules ──► AnalysisCache
//!                    ▲                                           │
//!                    └──── Scheduler (timers) ◄── tick ──────────┘
//! ```

pub mod engine;
pub mod errors;
pub mod rule;
pub mod schedule;

pub(crate) mod history;
pub(crate) mod scheduler;

pub use engine::{EngineStats, InvalidationRuleEngine};
pub use errors::{RuleError, RuleResult};
pub use rule::{
    default_rules, InvalidationContext, InvalidationResult, InvalidationRule,
    InvalidationStrategy, InvalidationTrigger, RuleConditions, RuleId, RulePatch, RuleSpec,
};
pub use schedule::{Frequency, Schedule};
