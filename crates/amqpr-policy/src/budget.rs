//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Stateful wrapper pairing a delay sequence with a retry-count ceiling."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use crate::{DelaySequence, RecoveryPolicy};

/// Stateful companion to a [`RecoveryPolicy`]: tracks how many attempts have
/// been consumed and stops producing delays once `retry_count` is spent.
///
/// A fresh `RetryBudget` is created once per recovery cycle; it is not
/// meant to be reused across cycles.
#[derive(Debug)]
pub struct RetryBudget {
    sequence: DelaySequence,
    retry_count: Option<u64>,
    consumed: u64,
}

impl RetryBudget {
    /// Build a new budget from a policy, snapshotting a fresh delay
    /// sequence and its retry ceiling.
    pub fn new(policy: &dyn RecoveryPolicy) -> Self {
        Self {
            sequence: policy.sequence(),
            retry_count: policy.retry_count(),
            consumed: 0,
        }
    }

    /// Number of attempts already consumed via [`RetryBudget::next_delay`].
    pub fn attempts_consumed(&self) -> u64 {
        self.consumed
    }

    /// Returns the delay for the next attempt, or `None` if the retry
    /// budget is exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(limit) = self.retry_count {
            if self.consumed >= limit {
                return None;
            }
        }
        let delay = self.sequence.next()?;
        self.consumed += 1;
        Some(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ConstantPolicy;

    #[test]
    fn budget_stops_once_retry_count_is_spent() {
        let policy = ConstantPolicy::new(10, Some(2), false).unwrap();
        let mut budget = RetryBudget::new(&policy);
        assert!(budget.next_delay().is_some());
        assert!(budget.next_delay().is_some());
        assert!(budget.next_delay().is_none());
        assert_eq!(budget.attempts_consumed(), 2);
    }

    #[test]
    fn budget_is_unbounded_without_retry_count() {
        let policy = ConstantPolicy::new(1, None, false).unwrap();
        let mut budget = RetryBudget::new(&policy);
        for _ in 0..1000 {
            assert!(budget.next_delay().is_some());
        }
    }
}
