//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Deterministic reconnect-delay generators and retry budgets."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! The recovery policy engine: pure functions from attempt index
//! to delay, bounded by an optional retry count. Four variants are
//! provided — constant, linear, exponential, and decorrelated jitter — each
//! validated at construction and each yielding a lazy, replayable sequence
//! of [`Duration`]s via [`RecoveryPolicy::sequence`].

mod budget;
mod variants;

pub use amqpr_common::ConfigurationError as PolicyError;
pub use budget::RetryBudget;
pub use variants::{
    ConstantPolicy, DecorrelatedJitterPolicy, ExponentialPolicy, LinearPolicy,
};

use std::fmt;
use std::time::Duration;

use amqpr_common::RecoveryPolicyConfig;

/// A reconnect-delay generator: a bound on the number of attempts plus a
/// pure, replayable sequence of delays.
pub trait RecoveryPolicy: fmt::Debug + Send + Sync {
    /// Upper bound on the number of attempts this policy permits, or `None`
    /// for unbounded retry.
    fn retry_count(&self) -> Option<u64>;

    /// Whether the very first attempt fires without delay.
    fn fast_first(&self) -> bool;

    /// Produce a fresh, independent sequence of delays starting at attempt
    /// 0. Calling this twice and taking the same number of elements from
    /// each must yield identical sequences.
    fn sequence(&self) -> DelaySequence;

    /// Convenience accessor equivalent to `self.sequence().nth(attempt)`.
    fn delay(&self, attempt: u64) -> Duration {
        self.sequence()
            .nth(attempt as usize)
            .expect("delay sequences are infinite")
    }
}

/// Construct a boxed [`RecoveryPolicy`] from its configuration description,
/// validating parameters along the way.
pub fn from_config(config: &RecoveryPolicyConfig) -> Result<Box<dyn RecoveryPolicy>, PolicyError> {
    match config {
        RecoveryPolicyConfig::Constant {
            delay_ms,
            retry_count,
            fast_first,
        } => Ok(Box::new(ConstantPolicy::new(
            *delay_ms as i64,
            retry_count.map(|c| c as i64),
            *fast_first,
        )?)),
        RecoveryPolicyConfig::Linear {
            initial_delay_ms,
            max_delay_ms,
            retry_count,
            factor,
            fast_first,
        } => Ok(Box::new(LinearPolicy::new(
            *initial_delay_ms as i64,
            max_delay_ms.map(|m| m as i64),
            retry_count.map(|c| c as i64),
            *factor,
            *fast_first,
        )?)),
        RecoveryPolicyConfig::Exponential {
            initial_delay_ms,
            max_delay_ms,
            retry_count,
            factor,
            fast_first,
        } => Ok(Box::new(ExponentialPolicy::new(
            *initial_delay_ms as i64,
            max_delay_ms.map(|m| m as i64),
            retry_count.map(|c| c as i64),
            *factor,
            *fast_first,
        )?)),
        RecoveryPolicyConfig::DecorrelatedJitter {
            initial_delay_ms,
            max_delay_ms,
            retry_count,
            fast_first,
            seed,
        } => Ok(Box::new(DecorrelatedJitterPolicy::new(
            *initial_delay_ms as i64,
            *max_delay_ms as i64,
            retry_count.map(|c| c as i64),
            *fast_first,
            *seed,
        )?)),
    }
}

/// A lazy, infinite sequence of delays produced by a [`RecoveryPolicy`].
///
/// Wraps an enum-dispatched iterator rather than a `Box<dyn Iterator>` so
/// cloning a fresh sequence never allocates.
#[derive(Debug, Clone)]
pub struct DelaySequence(pub(crate) variants::SequenceState);

impl Iterator for DelaySequence {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        self.0.next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_config_builds_exponential_policy() {
        let config = RecoveryPolicyConfig::Exponential {
            initial_delay_ms: 10,
            max_delay_ms: None,
            retry_count: None,
            factor: 2.0,
            fast_first: false,
        };
        let policy = from_config(&config).expect("valid config builds");
        let delays: Vec<_> = policy.sequence().take(3).map(|d| d.as_millis()).collect();
        assert_eq!(delays, vec![10, 20, 40]);
    }

    #[test]
    fn from_config_rejects_empty_endpoint_unrelated_but_propagates_factor_error() {
        let config = RecoveryPolicyConfig::Exponential {
            initial_delay_ms: 10,
            max_delay_ms: None,
            retry_count: None,
            factor: 0.5,
            fast_first: false,
        };
        assert!(from_config(&config).is_err());
    }
}
