//! Timer table for scheduled rules.
//!
//! Each rule id maps to at most one armed timer, so re-arming replaces the
//! previous timer instead of adding a second one. The table is passive: a
//! driver (the engine's background task, or a test) asks it which rules are
//! due at a given instant.

use super::errors::RuleResult;
use super::rule::RuleId;
use super::schedule::Schedule;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone)]
struct ArmedTimer {
    schedule: Schedule,
    next_fire_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub(crate) struct Scheduler {
    timers: HashMap<RuleId, ArmedTimer>,
}

impl Scheduler {
    /// Arm (or re-arm) the timer for `rule_id`, first firing after `now`
    pub(crate) fn arm(&mut self, rule_id: RuleId, schedule: &Schedule, now: DateTime<Utc>) -> RuleResult<()> {
        let next_fire_at = schedule.next_fire_after(now)?;
        let replaced = self
            .timers
            .insert(
                rule_id,
                ArmedTimer {
                    schedule: schedule.clone(),
                    next_fire_at,
                },
            )
            .is_some();

        debug!(
            rule_id = %rule_id,
            next_fire_at = %next_fire_at,
            replaced = replaced,
            "Rule timer armed"
        );
        Ok(())
    }

    /// Tear down the timer for `rule_id`, returning whether one existed
    pub(crate) fn disarm(&mut self, rule_id: &RuleId) -> bool {
        let removed = self.timers.remove(rule_id).is_some();
        if removed {
            debug!(rule_id = %rule_id, "Rule timer disarmed");
        }
        removed
    }

    /// Rules due at `now`; each is advanced to its next fire time
    ///
    /// Fires missed while the driver was not ticking collapse into one.
    pub(crate) fn take_due(&mut self, now: DateTime<Utc>) -> Vec<RuleId> {
        let mut due = Vec::new();
        for (rule_id, timer) in &mut self.timers {
            if timer.next_fire_at > now {
                continue;
            }
            due.push(*rule_id);
            match timer.schedule.next_fire_after(now) {
                Ok(next) => timer.next_fire_at = next,
                // Armed schedules were validated; keep the timer inert if not
                Err(_) => timer.next_fire_at = DateTime::<Utc>::MAX_UTC,
            }
        }
        due
    }

    pub(crate) fn next_fire_at(&self, rule_id: &RuleId) -> Option<DateTime<Utc>> {
        self.timers.get(rule_id).map(|t| t.next_fire_at)
    }

    pub(crate) fn len(&self) -> usize {
        self.timers.len()
    }
}
