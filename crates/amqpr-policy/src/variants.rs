//! ---
//! ems_section: "07-resilience-fault-tolerance"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Concrete recovery policy variants and their delay formulas."
//! ems_version: "v0.1.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::{DelaySequence, PolicyError, RecoveryPolicy};

fn require_non_negative_delay(parameter: &'static str, value: i64) -> Result<u64, PolicyError> {
    if value < 0 {
        return Err(PolicyError::NegativeDelay { parameter, value });
    }
    Ok(value as u64)
}

fn require_non_negative_retry_count(value: Option<i64>) -> Result<Option<u64>, PolicyError> {
    match value {
        None => Ok(None),
        Some(v) if v < 0 => Err(PolicyError::NegativeRetryCount { value: v }),
        Some(v) => Ok(Some(v as u64)),
    }
}

fn require_factor_at_least_one(factor: f64) -> Result<(), PolicyError> {
    if factor < 1.0 {
        return Err(PolicyError::FactorBelowOne { value: factor });
    }
    Ok(())
}

fn require_max_not_below_initial(max_ms: u64, initial_ms: u64) -> Result<(), PolicyError> {
    if max_ms < initial_ms {
        return Err(PolicyError::MaxDelayBelowInitial { max_ms, initial_ms });
    }
    Ok(())
}

/// Fires every attempt after the first at the same fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantPolicy {
    delay: Duration,
    retry_count: Option<u64>,
    fast_first: bool,
}

impl ConstantPolicy {
    /// Validates that `delay_ms` and `retry_count` are non-negative.
    pub fn new(
        delay_ms: i64,
        retry_count: Option<i64>,
        fast_first: bool,
    ) -> Result<Self, PolicyError> {
        let delay_ms = require_non_negative_delay("delay_ms", delay_ms)?;
        let retry_count = require_non_negative_retry_count(retry_count)?;
        Ok(Self {
            delay: Duration::from_millis(delay_ms),
            retry_count,
            fast_first,
        })
    }
}

impl RecoveryPolicy for ConstantPolicy {
    fn retry_count(&self) -> Option<u64> {
        self.retry_count
    }

    fn fast_first(&self) -> bool {
        self.fast_first
    }

    fn sequence(&self) -> DelaySequence {
        DelaySequence(SequenceState::Constant {
            delay: self.delay,
            fast_first: self.fast_first,
            attempt: 0,
        })
    }
}

/// Grows the delay by a fixed additive amount per attempt, capped at an
/// optional maximum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearPolicy {
    initial: Duration,
    max: Option<Duration>,
    retry_count: Option<u64>,
    factor: f64,
    fast_first: bool,
}

impl LinearPolicy {
    /// Validates that `initial_delay_ms`, `max_delay_ms`, and `retry_count`
    /// are non-negative, that `max_delay_ms` (if present) is not below
    /// `initial_delay_ms`, and that `factor >= 1.0`.
    pub fn new(
        initial_delay_ms: i64,
        max_delay_ms: Option<i64>,
        retry_count: Option<i64>,
        factor: f64,
        fast_first: bool,
    ) -> Result<Self, PolicyError> {
        let initial_ms = require_non_negative_delay("initial_delay_ms", initial_delay_ms)?;
        let max_ms = max_delay_ms
            .map(|m| require_non_negative_delay("max_delay_ms", m))
            .transpose()?;
        if let Some(max_ms) = max_ms {
            require_max_not_below_initial(max_ms, initial_ms)?;
        }
        require_factor_at_least_one(factor)?;
        let retry_count = require_non_negative_retry_count(retry_count)?;
        Ok(Self {
            initial: Duration::from_millis(initial_ms),
            max: max_ms.map(Duration::from_millis),
            retry_count,
            factor,
            fast_first,
        })
    }
}

impl RecoveryPolicy for LinearPolicy {
    fn retry_count(&self) -> Option<u64> {
        self.retry_count
    }

    fn fast_first(&self) -> bool {
        self.fast_first
    }

    fn sequence(&self) -> DelaySequence {
        DelaySequence(SequenceState::Linear {
            initial: self.initial,
            max: self.max,
            factor: self.factor,
            fast_first: self.fast_first,
            attempt: 0,
        })
    }
}

/// Grows the delay by a multiplicative factor per attempt, capped at an
/// optional maximum. With `fast_first` set, the zeroth attempt
/// fires immediately and the first real attempt pays exactly `initial`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExponentialPolicy {
    initial: Duration,
    max: Option<Duration>,
    retry_count: Option<u64>,
    factor: f64,
    fast_first: bool,
}

impl ExponentialPolicy {
    /// Same validation as [`LinearPolicy::new`].
    pub fn new(
        initial_delay_ms: i64,
        max_delay_ms: Option<i64>,
        retry_count: Option<i64>,
        factor: f64,
        fast_first: bool,
    ) -> Result<Self, PolicyError> {
        let initial_ms = require_non_negative_delay("initial_delay_ms", initial_delay_ms)?;
        let max_ms = max_delay_ms
            .map(|m| require_non_negative_delay("max_delay_ms", m))
            .transpose()?;
        if let Some(max_ms) = max_ms {
            require_max_not_below_initial(max_ms, initial_ms)?;
        }
        require_factor_at_least_one(factor)?;
        let retry_count = require_non_negative_retry_count(retry_count)?;
        Ok(Self {
            initial: Duration::from_millis(initial_ms),
            max: max_ms.map(Duration::from_millis),
            retry_count,
            factor,
            fast_first,
        })
    }
}

impl RecoveryPolicy for ExponentialPolicy {
    fn retry_count(&self) -> Option<u64> {
        self.retry_count
    }

    fn fast_first(&self) -> bool {
        self.fast_first
    }

    fn sequence(&self) -> DelaySequence {
        DelaySequence(SequenceState::Exponential {
            initial: self.initial,
            max: self.max,
            factor: self.factor,
            fast_first: self.fast_first,
            attempt: 0,
        })
    }
}

/// AWS-style "decorrelated jitter" backoff: each delay is drawn uniformly
/// from `[initial, min(max, previous * 3)]`. Seedable for
/// deterministic tests; unseeded construction draws from entropy.
#[derive(Debug, Clone)]
pub struct DecorrelatedJitterPolicy {
    initial: Duration,
    max: Duration,
    retry_count: Option<u64>,
    fast_first: bool,
    seed: Option<u64>,
}

impl DecorrelatedJitterPolicy {
    /// Validates that `initial_delay_ms`, `max_delay_ms`, and `retry_count`
    /// are non-negative and that `max_delay_ms >= initial_delay_ms`.
    pub fn new(
        initial_delay_ms: i64,
        max_delay_ms: i64,
        retry_count: Option<i64>,
        fast_first: bool,
        seed: Option<u64>,
    ) -> Result<Self, PolicyError> {
        let initial_ms = require_non_negative_delay("initial_delay_ms", initial_delay_ms)?;
        let max_ms = require_non_negative_delay("max_delay_ms", max_delay_ms)?;
        require_max_not_below_initial(max_ms, initial_ms)?;
        let retry_count = require_non_negative_retry_count(retry_count)?;
        Ok(Self {
            initial: Duration::from_millis(initial_ms),
            max: Duration::from_millis(max_ms),
            retry_count,
            fast_first,
            seed,
        })
    }
}

impl RecoveryPolicy for DecorrelatedJitterPolicy {
    fn retry_count(&self) -> Option<u64> {
        self.retry_count
    }

    fn fast_first(&self) -> bool {
        self.fast_first
    }

    fn sequence(&self) -> DelaySequence {
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        DelaySequence(SequenceState::Jitter {
            initial: self.initial,
            max: self.max,
            fast_first: self.fast_first,
            attempt: 0,
            // Tracks what the un-suppressed attempt-0 delay would have
            // been, so a `fast_first` zero-report at attempt 0 doesn't
            // collapse the growth window for attempt 1.
            previous: self.initial,
            rng,
        })
    }
}

/// Enum-dispatched iterator state backing [`DelaySequence`].
#[derive(Debug, Clone)]
pub(crate) enum SequenceState {
    Constant {
        delay: Duration,
        fast_first: bool,
        attempt: u64,
    },
    Linear {
        initial: Duration,
        max: Option<Duration>,
        factor: f64,
        fast_first: bool,
        attempt: u64,
    },
    Exponential {
        initial: Duration,
        max: Option<Duration>,
        factor: f64,
        fast_first: bool,
        attempt: u64,
    },
    Jitter {
        initial: Duration,
        max: Duration,
        fast_first: bool,
        attempt: u64,
        previous: Duration,
        rng: StdRng,
    },
}

fn cap(delay: Duration, max: Option<Duration>) -> Duration {
    match max {
        Some(max) if delay > max => max,
        _ => delay,
    }
}

impl SequenceState {
    pub(crate) fn next(&mut self) -> Option<Duration> {
        match self {
            SequenceState::Constant {
                delay,
                fast_first,
                attempt,
            } => {
                let out = if *attempt == 0 && *fast_first {
                    Duration::ZERO
                } else {
                    *delay
                };
                *attempt += 1;
                Some(out)
            }
            SequenceState::Linear {
                initial,
                max,
                factor,
                fast_first,
                attempt,
            } => {
                let out = if *attempt == 0 && *fast_first {
                    Duration::ZERO
                } else {
                    let scaled = initial.as_secs_f64() * (1.0 + factor * (*attempt as f64));
                    cap(Duration::from_secs_f64(scaled.max(0.0)), *max)
                };
                *attempt += 1;
                Some(out)
            }
            SequenceState::Exponential {
                initial,
                max,
                factor,
                fast_first,
                attempt,
            } => {
                let out = if *attempt == 0 && *fast_first {
                    Duration::ZERO
                } else {
                    let exponent = if *fast_first {
                        (*attempt - 1) as i32
                    } else {
                        *attempt as i32
                    };
                    let scaled = initial.as_secs_f64() * factor.powi(exponent);
                    cap(Duration::from_secs_f64(scaled.max(0.0)), *max)
                };
                *attempt += 1;
                Some(out)
            }
            SequenceState::Jitter {
                initial,
                max,
                fast_first,
                attempt,
                previous,
                rng,
            } => {
                if *attempt == 0 {
                    *attempt += 1;
                    return Some(if *fast_first { Duration::ZERO } else { *initial });
                }
                let ceiling = cap(*previous * 3, Some(*max));
                let lo = initial.as_secs_f64();
                let hi = ceiling.as_secs_f64().max(lo);
                let drawn = if hi > lo {
                    rng.gen_range(lo..=hi)
                } else {
                    lo
                };
                let out = Duration::from_secs_f64(drawn);
                *previous = out;
                *attempt += 1;
                Some(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn millis(seq: impl Iterator<Item = Duration>, n: usize) -> Vec<u128> {
        seq.take(n).map(|d| d.as_millis()).collect()
    }

    #[test]
    fn constant_policy_repeats_delay_without_fast_first() {
        let policy = ConstantPolicy::new(500, None, false).unwrap();
        assert_eq!(millis(policy.sequence(), 4), vec![500, 500, 500, 500]);
    }

    #[test]
    fn constant_policy_fast_first_zeroes_first_attempt() {
        let policy = ConstantPolicy::new(500, None, true).unwrap();
        assert_eq!(millis(policy.sequence(), 3), vec![0, 500, 500]);
    }

    #[test]
    fn constant_policy_rejects_negative_delay() {
        assert!(matches!(
            ConstantPolicy::new(-1, None, false),
            Err(PolicyError::NegativeDelay { .. })
        ));
    }

    #[test]
    fn exponential_matches_reference_sequence() {
        let policy = ExponentialPolicy::new(10, None, None, 2.0, false).unwrap();
        assert_eq!(millis(policy.sequence(), 5), vec![10, 20, 40, 80, 160]);
    }

    #[test]
    fn exponential_matches_reference_sequence_with_cap() {
        let policy = ExponentialPolicy::new(10, Some(250), None, 3.0, false).unwrap();
        assert_eq!(millis(policy.sequence(), 5), vec![10, 30, 90, 250, 250]);
    }

    #[test]
    fn exponential_fast_first_shifts_index() {
        let policy = ExponentialPolicy::new(10, None, None, 2.0, true).unwrap();
        assert_eq!(millis(policy.sequence(), 5), vec![0, 10, 20, 40, 80]);
    }

    #[test]
    fn exponential_rejects_factor_below_one() {
        assert!(matches!(
            ExponentialPolicy::new(10, None, None, 0.9, false),
            Err(PolicyError::FactorBelowOne { .. })
        ));
    }

    #[test]
    fn exponential_rejects_max_below_initial() {
        assert!(matches!(
            ExponentialPolicy::new(100, Some(10), None, 2.0, false),
            Err(PolicyError::MaxDelayBelowInitial { .. })
        ));
    }

    #[test]
    fn linear_grows_additively_without_index_shift() {
        let policy = LinearPolicy::new(10, None, None, 1.0, false).unwrap();
        assert_eq!(millis(policy.sequence(), 4), vec![10, 20, 30, 40]);
    }

    #[test]
    fn linear_fast_first_only_zeroes_first_attempt() {
        let policy = LinearPolicy::new(10, None, None, 1.0, true).unwrap();
        assert_eq!(millis(policy.sequence(), 4), vec![0, 20, 30, 40]);
    }

    #[test]
    fn jitter_sequence_is_deterministic_with_seed() {
        let policy = DecorrelatedJitterPolicy::new(10, 250, None, false, Some(42)).unwrap();
        let first: Vec<_> = millis(policy.sequence(), 6);
        let second: Vec<_> = millis(policy.sequence(), 6);
        assert_eq!(first, second);
        assert_eq!(first[0], 10);
        for d in &first {
            assert!(*d >= 10 && *d <= 250);
        }
    }

    #[test]
    fn jitter_fast_first_zeroes_first_without_collapsing_window() {
        let policy = DecorrelatedJitterPolicy::new(10, 250, None, true, Some(7)).unwrap();
        let mut seq = policy.sequence();
        assert_eq!(seq.next().unwrap(), Duration::ZERO);
        let second = seq.next().unwrap();
        assert!(second.as_millis() >= 10);
    }

    #[test]
    fn jitter_rejects_max_below_initial() {
        assert!(matches!(
            DecorrelatedJitterPolicy::new(100, 10, None, false, None),
            Err(PolicyError::MaxDelayBelowInitial { .. })
        ));
    }
}
