//! Invalidation rules, their conditions and execution records.

use super::errors::{RuleError, RuleResult};
use super::schedule::Schedule;
use crate::cache::InvalidationFilter;
use crate::fingerprint::ContentFingerprint;
use crate::types::AnalysisType;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

pub type RuleId = Uuid;

/// How a triggered rule purges entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationStrategy {
    /// Purge every type in scope as soon as the trigger fires
    Immediate,
    /// Reserved for mark-stale-on-read; executes as a no-op (0 entries)
    /// until backends carry a staleness flag
    Lazy,
    /// Purge only when fired by the maintenance scheduler
    Scheduled,
    /// Expiry is left to the backend; executes as a no-op (inventory only)
    TtlBased,
    /// Purge only on an explicit user request
    Manual,
}

impl fmt::Display for InvalidationStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Immediate => "immediate",
            Self::Lazy => "lazy",
            Self::Scheduled => "scheduled",
            Self::TtlBased => "ttl_based",
            Self::Manual => "manual",
        };
        f.write_str(name)
    }
}

/// Category of domain event that can activate rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationTrigger {
    ContentUpdated,
    UserRequest,
    SystemMaintenance,
    DataCorruption,
    PolicyChange,
}

impl fmt::Display for InvalidationTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ContentUpdated => "content_updated",
            Self::UserRequest => "user_request",
            Self::SystemMaintenance => "system_maintenance",
            Self::DataCorruption => "data_corruption",
            Self::PolicyChange => "policy_change",
        };
        f.write_str(name)
    }
}

/// Optional gates and entry filters of a rule
///
/// `content_hash_pattern` and `min_confidence` decide whether the rule
/// applies to a trigger's context; `max_age` and `max_access_count` select
/// which entries it purges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleConditions {
    /// Regex the context's content hash must match
    pub content_hash_pattern: Option<String>,
    /// Only purge entries at least this old
    pub max_age: Option<Duration>,
    /// Only purge entries read at most this many times
    pub max_access_count: Option<u64>,
    /// Applies only when the context reports a confidence below this
    pub min_confidence: Option<f64>,
}

impl RuleConditions {
    fn validate(&self) -> RuleResult<()> {
        if let Some(threshold) = self.min_confidence {
            if !(0.0..=1.0).contains(&threshold) {
                return Err(RuleError::InvalidCondition(format!(
                    "min_confidence {threshold} outside 0.0-1.0"
                )));
            }
        }
        Ok(())
    }

    /// Whether the context satisfies every gate
    ///
    /// The pattern is compiled here, so a malformed one fails only the rule
    /// that carries it.
    pub(crate) fn admit(&self, context: Option<&InvalidationContext>) -> RuleResult<bool> {
        if let Some(pattern) = &self.content_hash_pattern {
            let regex = Regex::new(pattern).map_err(|e| {
                RuleError::InvalidCondition(format!("content_hash_pattern '{pattern}': {e}"))
            })?;
            let Some(hash) = context.and_then(|c| c.content_hash.as_ref()) else {
                return Ok(false);
            };
            if !regex.is_match(hash.as_str()) {
                return Ok(false);
            }
        }

        if let Some(threshold) = self.min_confidence {
            match context.and_then(|c| c.confidence) {
                Some(confidence) if confidence < threshold => {}
                _ => return Ok(false),
            }
        }

        Ok(true)
    }

    /// Entry filter for the purge, when the conditions select entries
    pub(crate) fn entry_filter(&self) -> Option<InvalidationFilter> {
        if self.max_age.is_none() && self.max_access_count.is_none() {
            return None;
        }
        Some(InvalidationFilter {
            min_age: self.max_age,
            max_access_count: self.max_access_count,
            ..InvalidationFilter::default()
        })
    }
}

/// A named invalidation policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationRule {
    pub id: RuleId,
    pub name: String,
    pub description: String,
    pub strategy: InvalidationStrategy,
    pub triggers: BTreeSet<InvalidationTrigger>,
    pub analysis_types: BTreeSet<AnalysisType>,
    pub conditions: RuleConditions,
    pub schedule: Option<Schedule>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_executed_at: Option<DateTime<Utc>>,
}

impl InvalidationRule {
    pub(crate) fn from_spec(spec: RuleSpec, now: DateTime<Utc>) -> RuleResult<Self> {
        spec.validate()?;
        Ok(Self {
            id: Uuid::new_v4(),
            name: spec.name,
            description: spec.description,
            strategy: spec.strategy,
            triggers: spec.triggers,
            analysis_types: spec.analysis_types,
            conditions: spec.conditions,
            schedule: spec.schedule,
            is_active: spec.is_active,
            created_at: now,
            last_executed_at: None,
        })
    }

    /// Apply a patch, returning the merged rule without touching `self`
    pub(crate) fn patched(&self, patch: RulePatch) -> RuleResult<Self> {
        let mut next = self.clone();
        if let Some(name) = patch.name {
            next.name = name;
        }
        if let Some(description) = patch.description {
            next.description = description;
        }
        if let Some(strategy) = patch.strategy {
            next.strategy = strategy;
        }
        if let Some(triggers) = patch.triggers {
            next.triggers = triggers;
        }
        if let Some(types) = patch.analysis_types {
            next.analysis_types = types;
        }
        if let Some(conditions) = patch.conditions {
            next.conditions = conditions;
        }
        if let Some(schedule) = patch.schedule {
            next.schedule = schedule;
        }
        if let Some(active) = patch.is_active {
            next.is_active = active;
        }

        if let Some(schedule) = &next.schedule {
            schedule.validate()?;
        }
        next.conditions.validate()?;
        Ok(next)
    }

    /// Whether this rule should own a live timer
    pub fn wants_timer(&self) -> bool {
        self.is_active && self.strategy == InvalidationStrategy::Scheduled && self.schedule.is_some()
    }

    /// Types to purge: the rule's scope, narrowed by the context's type
    pub(crate) fn effective_scope(&self, context: Option<&InvalidationContext>) -> Vec<AnalysisType> {
        match context.and_then(|c| c.analysis_type) {
            Some(only) if self.analysis_types.contains(&only) => vec![only],
            Some(_) => Vec::new(),
            None => self.analysis_types.iter().copied().collect(),
        }
    }
}

/// Everything needed to create a rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub strategy: InvalidationStrategy,
    #[serde(default)]
    pub triggers: BTreeSet<InvalidationTrigger>,
    #[serde(default)]
    pub analysis_types: BTreeSet<AnalysisType>,
    #[serde(default)]
    pub conditions: RuleConditions,
    #[serde(default)]
    pub schedule: Option<Schedule>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl RuleSpec {
    pub fn new(name: impl Into<String>, strategy: InvalidationStrategy) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            strategy,
            triggers: BTreeSet::new(),
            analysis_types: BTreeSet::new(),
            conditions: RuleConditions::default(),
            schedule: None,
            is_active: true,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn on(mut self, trigger: InvalidationTrigger) -> Self {
        self.triggers.insert(trigger);
        self
    }

    pub fn scoped_to(mut self, types: impl IntoIterator<Item = AnalysisType>) -> Self {
        self.analysis_types.extend(types);
        self
    }

    pub fn all_types(self) -> Self {
        self.scoped_to(AnalysisType::ALL)
    }

    pub fn with_conditions(mut self, conditions: RuleConditions) -> Self {
        self.conditions = conditions;
        self
    }

    pub fn with_schedule(mut self, schedule: Schedule) -> Self {
        self.schedule = Some(schedule);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    fn validate(&self) -> RuleResult<()> {
        if let Some(schedule) = &self.schedule {
            schedule.validate()?;
        }
        self.conditions.validate()
    }
}

/// Partial update; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RulePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub strategy: Option<InvalidationStrategy>,
    pub triggers: Option<BTreeSet<InvalidationTrigger>>,
    pub analysis_types: Option<BTreeSet<AnalysisType>>,
    pub conditions: Option<RuleConditions>,
    /// `Some(None)` removes the schedule
    pub schedule: Option<Option<Schedule>>,
    pub is_active: Option<bool>,
}

impl RulePatch {
    pub fn active(is_active: bool) -> Self {
        Self {
            is_active: Some(is_active),
            ..Self::default()
        }
    }

    pub fn schedule(schedule: Schedule) -> Self {
        Self {
            schedule: Some(Some(schedule)),
            ..Self::default()
        }
    }
}

/// Facts about the event that fired a trigger
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvalidationContext {
    pub content_hash: Option<ContentFingerprint>,
    /// Narrows every rule's scope to this one type
    pub analysis_type: Option<AnalysisType>,
    pub confidence: Option<f64>,
    pub reason: Option<String>,
}

impl InvalidationContext {
    pub fn for_content(hash: ContentFingerprint) -> Self {
        Self {
            content_hash: Some(hash),
            ..Self::default()
        }
    }

    pub fn for_type(analysis_type: AnalysisType) -> Self {
        Self {
            analysis_type: Some(analysis_type),
            ..Self::default()
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Record of one rule execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationResult {
    pub rule_id: RuleId,
    pub rule_name: String,
    pub trigger: InvalidationTrigger,
    pub strategy: InvalidationStrategy,
    pub entries_invalidated: u64,
    pub execution_time: Duration,
    pub success: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// The rules installed at start-up unless disabled in configuration
pub fn default_rules() -> Vec<RuleSpec> {
    vec![
        RuleSpec::new("content-update", InvalidationStrategy::Immediate)
            .describe("Drop every cached analysis when content changes")
            .on(InvalidationTrigger::ContentUpdated)
            .all_types(),
        RuleSpec::new("daily-cleanup", InvalidationStrategy::Scheduled)
            .describe("Purge entries older than seven days every night")
            .on(InvalidationTrigger::SystemMaintenance)
            .all_types()
            .with_conditions(RuleConditions {
                max_age: Some(Duration::from_secs(7 * 24 * 3600)),
                ..RuleConditions::default()
            })
            .with_schedule(Schedule::daily_at("02:00")),
        RuleSpec::new("manual-purge", InvalidationStrategy::Manual)
            .describe("User-initiated purge of all cached analyses")
            .on(InvalidationTrigger::UserRequest)
            .all_types(),
    ]
}
