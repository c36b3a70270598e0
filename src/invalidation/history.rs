//! Bounded log of rule executions, oldest dropped first.

use super::rule::InvalidationResult;
use std::collections::VecDeque;

#[derive(Debug)]
pub(crate) struct ExecutionHistory {
    limit: usize,
    records: VecDeque<InvalidationResult>,
}

impl ExecutionHistory {
    pub(crate) fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            limit,
            records: VecDeque::with_capacity(limit.min(1024)),
        }
    }

    pub(crate) fn push(&mut self, result: InvalidationResult) {
        while self.records.len() >= self.limit {
            self.records.pop_front();
        }
        self.records.push_back(result);
    }

    /// Oldest first
    pub(crate) fn snapshot(&self) -> Vec<InvalidationResult> {
        self.records.iter().cloned().collect()
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invalidation::rule::{InvalidationStrategy, InvalidationTrigger};
    use chrono::Utc;
    use std::time::Duration;
    use uuid::Uuid;

    fn result(n: u64) -> InvalidationResult {
        InvalidationResult {
            rule_id: Uuid::new_v4(),
            rule_name: format!("rule-{n}"),
            trigger: InvalidationTrigger::UserRequest,
            strategy: InvalidationStrategy::Manual,
            entries_invalidated: n,
            execution_time: Duration::from_millis(1),
            success: true,
            error: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_oldest_dropped_at_cap() {
        let mut history = ExecutionHistory::new(3);
        for n in 0..5 {
            history.push(result(n));
        }
        let kept: Vec<u64> = history
            .snapshot()
            .iter()
            .map(|r| r.entries_invalidated)
            .collect();
        assert_eq!(kept, vec![2, 3, 4]);

        history.clear();
        assert_eq!(history.len(), 0);
    }
}
