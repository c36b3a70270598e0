//! Rule engine: selects rules for a trigger, runs them in isolation and
//! drives scheduled rules.

use super::errors::{RuleError, RuleResult};
use super::history::ExecutionHistory;
use super::rule::{
    default_rules, InvalidationContext, InvalidationResult, InvalidationRule,
    InvalidationStrategy, InvalidationTrigger, RuleId, RulePatch, RuleSpec,
};
use super::scheduler::Scheduler;
use crate::analysis::AnalysisCache;
use crate::clock::SharedClock;
use crate::config::InvalidationConfig;
use crate::error::panic_message;
use crate::logging::log_invalidation_execution;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Engine counters and rule inventory
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStats {
    pub total_rules: usize,
    pub active_rules: usize,
    pub rules_by_strategy: BTreeMap<InvalidationStrategy, usize>,
    pub armed_timers: usize,
    pub executions: u64,
    pub failed_executions: u64,
    pub entries_invalidated: u64,
    pub history_len: usize,
}

#[derive(Debug)]
struct EngineInner {
    cache: AnalysisCache,
    clock: SharedClock,
    rules: RwLock<HashMap<RuleId, InvalidationRule>>,
    scheduler: Mutex<Scheduler>,
    history: Mutex<ExecutionHistory>,
    tick: Duration,
    driver: Mutex<Option<JoinHandle<()>>>,
    executions: AtomicU64,
    failed_executions: AtomicU64,
    entries_invalidated: AtomicU64,
}

impl Drop for EngineInner {
    fn drop(&mut self) {
        if let Some(handle) = self.driver.get_mut().take() {
            handle.abort();
        }
    }
}

/// Rule-driven invalidation over an [`AnalysisCache`]
///
/// Rules live for the lifetime of the engine; nothing is persisted.
/// Cloning is cheap and clones share rules, timers and history.
#[derive(Debug, Clone)]
pub struct InvalidationRuleEngine {
    inner: Arc<EngineInner>,
}

impl InvalidationRuleEngine {
    /// Create an engine, installing the default rules if configured
    pub fn new(cache: AnalysisCache, clock: SharedClock, config: &InvalidationConfig) -> Self {
        let engine = Self {
            inner: Arc::new(EngineInner {
                cache,
                clock,
                rules: RwLock::new(HashMap::new()),
                scheduler: Mutex::new(Scheduler::default()),
                history: Mutex::new(ExecutionHistory::new(config.history_limit)),
                tick: config.scheduler_tick(),
                driver: Mutex::new(None),
                executions: AtomicU64::new(0),
                failed_executions: AtomicU64::new(0),
                entries_invalidated: AtomicU64::new(0),
            }),
        };

        if config.install_default_rules {
            for spec in default_rules() {
                let name = spec.name.clone();
                if let Err(e) = engine.add_rule(spec) {
                    warn!(rule_name = %name, error = %e, "Default rule rejected");
                }
            }
        }

        engine
    }

    /// Store a new rule, arming its timer if it is an active scheduled rule
    pub fn add_rule(&self, spec: RuleSpec) -> RuleResult<RuleId> {
        let now = self.inner.clock.now();
        let rule = InvalidationRule::from_spec(spec, now)?;
        let id = rule.id;

        let mut rules = self.inner.rules.write();
        if rule.wants_timer() {
            if let Some(schedule) = &rule.schedule {
                self.inner.scheduler.lock().arm(id, schedule, now)?;
            }
        }

        info!(
            rule_id = %id,
            rule_name = %rule.name,
            strategy = %rule.strategy,
            active = rule.is_active,
            "Invalidation rule added"
        );
        rules.insert(id, rule);
        Ok(id)
    }

    /// Merge `patch` into a rule; `Ok(false)` if the id is unknown
    ///
    /// The rule's timer is always torn down and, if the merged rule still
    /// wants one, re-armed, so a rule never holds more than one timer.
    pub fn update_rule(&self, id: RuleId, patch: RulePatch) -> RuleResult<bool> {
        let now = self.inner.clock.now();
        let mut rules = self.inner.rules.write();
        let Some(current) = rules.get(&id) else {
            return Ok(false);
        };
        let next = current.patched(patch)?;

        {
            let mut scheduler = self.inner.scheduler.lock();
            scheduler.disarm(&id);
            if next.wants_timer() {
                if let Some(schedule) = &next.schedule {
                    scheduler.arm(id, schedule, now)?;
                }
            }
        }

        debug!(rule_id = %id, active = next.is_active, "Invalidation rule updated");
        rules.insert(id, next);
        Ok(true)
    }

    /// Delete a rule and its timer; `false` if the id is unknown
    pub fn remove_rule(&self, id: RuleId) -> bool {
        let mut rules = self.inner.rules.write();
        let removed = rules.remove(&id);
        self.inner.scheduler.lock().disarm(&id);

        if let Some(rule) = &removed {
            info!(rule_id = %id, rule_name = %rule.name, "Invalidation rule removed");
        }
        removed.is_some()
    }

    pub fn get_rule(&self, id: RuleId) -> Option<InvalidationRule> {
        self.inner.rules.read().get(&id).cloned()
    }

    /// Every rule, oldest first
    pub fn rules(&self) -> Vec<InvalidationRule> {
        let mut rules: Vec<_> = self.inner.rules.read().values().cloned().collect();
        rules.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        rules
    }

    /// Run every active rule listening for `trigger`
    ///
    /// Rules whose conditions reject the context produce no result. Each
    /// remaining rule runs in isolation: an error or panic becomes a failed
    /// result and the other rules still run.
    pub async fn execute_invalidation(
        &self,
        trigger: InvalidationTrigger,
        context: Option<&InvalidationContext>,
    ) -> Vec<InvalidationResult> {
        let candidates: Vec<InvalidationRule> = self
            .rules()
            .into_iter()
            .filter(|rule| rule.is_active && rule.triggers.contains(&trigger))
            .collect();

        debug!(
            trigger = %trigger,
            candidates = candidates.len(),
            "Executing invalidation trigger"
        );

        let mut results = Vec::with_capacity(candidates.len());
        for rule in &candidates {
            if let Some(result) = self.run_rule(rule, trigger, context).await {
                results.push(result);
            }
        }
        results
    }

    /// Run one rule directly, regardless of its trigger set
    ///
    /// Strategy gating still applies: a manual rule only purges for
    /// `UserRequest`. Inactive rules yield `Ok(None)`.
    pub async fn execute_rule(
        &self,
        id: RuleId,
        trigger: InvalidationTrigger,
        context: Option<&InvalidationContext>,
    ) -> RuleResult<Option<InvalidationResult>> {
        let rule = self.get_rule(id).ok_or(RuleError::RuleNotFound(id))?;
        if !rule.is_active {
            return Ok(None);
        }
        Ok(self.run_rule(&rule, trigger, context).await)
    }

    /// Fire every scheduled rule whose timer is due at the clock's now
    pub async fn run_due_schedules(&self) -> Vec<InvalidationResult> {
        let now = self.inner.clock.now();
        let due = self.inner.scheduler.lock().take_due(now);
        if due.is_empty() {
            return Vec::new();
        }

        debug!(due = due.len(), "Scheduled rules due");
        let mut results = Vec::with_capacity(due.len());
        for id in due {
            let Some(rule) = self.get_rule(id).filter(|r| r.is_active) else {
                continue;
            };
            if let Some(result) = self
                .run_rule(&rule, InvalidationTrigger::SystemMaintenance, None)
                .await
            {
                results.push(result);
            }
        }
        results
    }

    /// Spawn the background task that checks timers every tick
    ///
    /// The task holds a weak reference and ends once the engine is dropped.
    /// Calling this again replaces the previous driver. A zero tick falls
    /// back to the default period.
    pub fn start_scheduler(&self) {
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        let mut tick = self.inner.tick;
        if tick.is_zero() {
            tick = InvalidationConfig::default().scheduler_tick();
            warn!(
                fallback_seconds = tick.as_secs(),
                "Scheduler tick of zero is not usable, using default"
            );
        }

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let engine = InvalidationRuleEngine { inner };
                let fired = engine.run_due_schedules().await;
                if !fired.is_empty() {
                    debug!(fired = fired.len(), "Scheduler tick fired rules");
                }
            }
        });

        info!(tick_seconds = tick.as_secs(), "Invalidation scheduler started");
        if let Some(previous) = self.inner.driver.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop the background driver; timers stay armed
    pub fn shutdown(&self) {
        if let Some(handle) = self.inner.driver.lock().take() {
            handle.abort();
            info!("Invalidation scheduler stopped");
        }
    }

    pub fn is_scheduler_running(&self) -> bool {
        self.inner
            .driver
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of live timers
    pub fn armed_timer_count(&self) -> usize {
        self.inner.scheduler.lock().len()
    }

    pub fn next_fire_at(&self, id: RuleId) -> Option<DateTime<Utc>> {
        self.inner.scheduler.lock().next_fire_at(&id)
    }

    /// Recent execution results, oldest first
    pub fn history(&self) -> Vec<InvalidationResult> {
        self.inner.history.lock().snapshot()
    }

    pub fn clear_history(&self) {
        self.inner.history.lock().clear();
    }

    pub fn stats(&self) -> EngineStats {
        let (total_rules, active_rules, rules_by_strategy) = {
            let rules = self.inner.rules.read();
            let mut by_strategy = BTreeMap::new();
            for rule in rules.values() {
                *by_strategy.entry(rule.strategy).or_insert(0) += 1;
            }
            let active = rules.values().filter(|r| r.is_active).count();
            (rules.len(), active, by_strategy)
        };

        EngineStats {
            total_rules,
            active_rules,
            rules_by_strategy,
            armed_timers: self.armed_timer_count(),
            executions: self.inner.executions.load(Ordering::Relaxed),
            failed_executions: self.inner.failed_executions.load(Ordering::Relaxed),
            entries_invalidated: self.inner.entries_invalidated.load(Ordering::Relaxed),
            history_len: self.inner.history.lock().len(),
        }
    }

    async fn run_rule(
        &self,
        rule: &InvalidationRule,
        trigger: InvalidationTrigger,
        context: Option<&InvalidationContext>,
    ) -> Option<InvalidationResult> {
        let started = Instant::now();
        let attempt = AssertUnwindSafe(self.apply_rule(rule, trigger, context))
            .catch_unwind()
            .await;

        let (entries_invalidated, error) = match attempt {
            Ok(Ok(None)) => {
                debug!(rule_id = %rule.id, trigger = %trigger, "Rule conditions not met");
                return None;
            }
            Ok(Ok(Some(count))) => (count, None),
            Ok(Err(e)) => (0, Some(e.to_string())),
            Err(panic) => (
                0,
                Some(format!(
                    "rule execution panicked: {}",
                    panic_message(panic.as_ref())
                )),
            ),
        };

        let result = InvalidationResult {
            rule_id: rule.id,
            rule_name: rule.name.clone(),
            trigger,
            strategy: rule.strategy,
            entries_invalidated,
            execution_time: started.elapsed(),
            success: error.is_none(),
            error,
            timestamp: self.inner.clock.now(),
        };
        self.record(&result);
        Some(result)
    }

    /// `Ok(None)` when the context fails the rule's conditions
    async fn apply_rule(
        &self,
        rule: &InvalidationRule,
        trigger: InvalidationTrigger,
        context: Option<&InvalidationContext>,
    ) -> RuleResult<Option<u64>> {
        if !rule.conditions.admit(context)? {
            return Ok(None);
        }

        let purges = match rule.strategy {
            InvalidationStrategy::Immediate => true,
            InvalidationStrategy::Scheduled => trigger == InvalidationTrigger::SystemMaintenance,
            InvalidationStrategy::Manual => trigger == InvalidationTrigger::UserRequest,
            InvalidationStrategy::Lazy | InvalidationStrategy::TtlBased => false,
        };
        if !purges {
            debug!(
                rule_id = %rule.id,
                strategy = %rule.strategy,
                trigger = %trigger,
                "Strategy does not purge for this trigger"
            );
            return Ok(Some(0));
        }

        let filter = rule.conditions.entry_filter();
        let mut total = 0;
        for analysis_type in rule.effective_scope(context) {
            total += self
                .inner
                .cache
                .try_invalidate_by_type(analysis_type, filter.as_ref())
                .await?;
        }
        Ok(Some(total))
    }

    fn record(&self, result: &InvalidationResult) {
        self.inner.executions.fetch_add(1, Ordering::Relaxed);
        if !result.success {
            self.inner.failed_executions.fetch_add(1, Ordering::Relaxed);
        }
        self.inner
            .entries_invalidated
            .fetch_add(result.entries_invalidated, Ordering::Relaxed);

        if let Some(rule) = self.inner.rules.write().get_mut(&result.rule_id) {
            rule.last_executed_at = Some(result.timestamp);
        }
        self.inner.history.lock().push(result.clone());

        log_invalidation_execution(
            &result.rule_id.to_string(),
            &result.rule_name,
            &result.trigger.to_string(),
            result.success,
            result.entries_invalidated,
            result.execution_time.as_millis() as u64,
            result.error.as_deref(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheProvider, InMemoryCacheBackend};
    use crate::clock::SystemClock;
    use crate::types::{AnalysisOptions, AnalysisType};

    fn engine(install_defaults: bool) -> (InvalidationRuleEngine, AnalysisCache) {
        let cache = AnalysisCache::new(
            CacheProvider::memory(InMemoryCacheBackend::with_defaults()),
            "analysis",
        );
        let config = InvalidationConfig {
            install_default_rules: install_defaults,
            ..InvalidationConfig::default()
        };
        let engine = InvalidationRuleEngine::new(cache.clone(), SystemClock::shared(), &config);
        (engine, cache)
    }

    #[tokio::test]
    async fn test_default_rules_installed() {
        let (engine, _) = engine(true);
        let stats = engine.stats();
        assert_eq!(stats.total_rules, 3);
        assert_eq!(stats.armed_timers, 1);
        assert_eq!(
            stats.rules_by_strategy.get(&InvalidationStrategy::Manual),
            Some(&1)
        );
    }

    #[tokio::test]
    async fn test_lazy_and_ttl_rules_are_noops() {
        let (engine, cache) = engine(false);
        cache
            .set(AnalysisType::Sentiment, "t", &AnalysisOptions::None, &1, None)
            .await;
        for strategy in [InvalidationStrategy::Lazy, InvalidationStrategy::TtlBased] {
            engine
                .add_rule(
                    RuleSpec::new(strategy.to_string(), strategy)
                        .on(InvalidationTrigger::PolicyChange)
                        .all_types(),
                )
                .unwrap();
        }

        let results = engine
            .execute_invalidation(InvalidationTrigger::PolicyChange, None)
            .await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.success && r.entries_invalidated == 0));
        assert!(cache
            .get::<u32>(AnalysisType::Sentiment, "t", &AnalysisOptions::None)
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_execute_rule_unknown_id() {
        let (engine, _) = engine(false);
        let missing = uuid::Uuid::new_v4();
        assert!(matches!(
            engine
                .execute_rule(missing, InvalidationTrigger::UserRequest, None)
                .await,
            Err(RuleError::RuleNotFound(id)) if id == missing
        ));
    }

    #[tokio::test]
    async fn test_remove_rule_disarms_timer() {
        let (engine, _) = engine(true);
        let scheduled = engine
            .rules()
            .into_iter()
            .find(|r| r.strategy == InvalidationStrategy::Scheduled)
            .unwrap();
        assert!(engine.next_fire_at(scheduled.id).is_some());

        assert!(engine.remove_rule(scheduled.id));
        assert_eq!(engine.armed_timer_count(), 0);
        assert!(!engine.remove_rule(scheduled.id));
    }

    #[tokio::test]
    async fn test_zero_tick_scheduler_keeps_running() {
        let cache = AnalysisCache::new(CacheProvider::noop(), "analysis");
        let config = InvalidationConfig {
            scheduler_tick_seconds: 0,
            ..InvalidationConfig::default()
        };
        let engine = InvalidationRuleEngine::new(cache, SystemClock::shared(), &config);

        engine.start_scheduler();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(engine.is_scheduler_running());
        engine.shutdown();
    }

    #[tokio::test]
    async fn test_start_and_shutdown_scheduler() {
        let (engine, _) = engine(true);
        engine.start_scheduler();
        assert!(engine.is_scheduler_running());
        engine.shutdown();
        tokio::task::yield_now().await;
        assert!(!engine.is_scheduler_running());
        assert_eq!(engine.armed_timer_count(), 1);
    }
}
