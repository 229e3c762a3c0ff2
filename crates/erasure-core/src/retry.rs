//! RetryPolicy (§4.6): exponential-backoff attempt scheduling and the
//! exhaustion rule that routes required- vs non-required-system failures.

use std::time::Duration;

use crate::policy::Policy;

/// Whether a step should be retried, and the decision's reasoning, given it
/// just failed on attempt `attempt` (1-indexed, the attempt that failed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub should_retry: bool,
    pub next_attempt: u32,
}

/// Pure scheduler: delay before attempt `n` (n >= 1, 1-indexed) given the
/// policy's initial delay and multiplier. Attempt 1 has no preceding delay
/// in practice (it runs immediately); this computes the delay *before*
/// retrying after a failed attempt `n`, i.e. delay before attempt `n+1`.
pub fn backoff_delay(policy: &Policy, failed_attempt: u32) -> Duration {
    debug_assert!(failed_attempt >= 1);
    let exponent = (failed_attempt - 1) as i32;
    let multiplier = policy.retry_backoff_multiplier.powi(exponent);
    let delay_ms = (policy.initial_retry_delay_ms as f64) * multiplier;
    Duration::from_millis(delay_ms.round() as u64)
}

/// A step is eligible for retry iff `attempts < maxRetryAttempts`.
pub fn decide(policy: &Policy, attempts_so_far: u32) -> RetryDecision {
    let should_retry = attempts_so_far < policy.max_retry_attempts;
    RetryDecision {
        should_retry,
        next_attempt: attempts_so_far + 1,
    }
}

/// What happens to the saga when a step exhausts its retries (§4.6/§7):
/// required-system exhaustion halts to manual review; otherwise the step is
/// marked failed and the saga continues toward `COMPLETED_WITH_EXCEPTIONS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExhaustionOutcome {
    HaltForManualReview,
    ContinueWithException,
}

pub fn exhaustion_outcome(step: &str, required_systems: &[String]) -> ExhaustionOutcome {
    if required_systems.iter().any(|s| s == step) {
        ExhaustionOutcome::HaltForManualReview
    } else {
        ExhaustionOutcome::ContinueWithException
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::Jurisdiction;

    fn policy() -> Policy {
        let mut p = Policy::for_jurisdiction(Jurisdiction::Eu).unwrap();
        p.max_retry_attempts = 3;
        p.initial_retry_delay_ms = 1000;
        p.retry_backoff_multiplier = 2.0;
        p
    }

    #[test]
    fn exponential_backoff_strictly_increases() {
        let p = policy();
        let d1 = backoff_delay(&p, 1);
        let d2 = backoff_delay(&p, 2);
        let d3 = backoff_delay(&p, 3);
        assert_eq!(d1, Duration::from_millis(1000));
        assert_eq!(d2, Duration::from_millis(2000));
        assert_eq!(d3, Duration::from_millis(4000));
        assert!(d2 > d1);
        assert!(d3 > d2);
    }

    #[test]
    fn eligible_until_max_attempts_reached() {
        let p = policy();
        assert!(decide(&p, 0).should_retry);
        assert!(decide(&p, 1).should_retry);
        assert!(decide(&p, 2).should_retry);
        assert!(!decide(&p, 3).should_retry);
    }

    #[test]
    fn required_system_exhaustion_halts_saga() {
        let required = vec!["payments".to_string(), "database".to_string()];
        assert_eq!(exhaustion_outcome("payments", &required), ExhaustionOutcome::HaltForManualReview);
        assert_eq!(exhaustion_outcome("slack", &required), ExhaustionOutcome::ContinueWithException);
    }
}
