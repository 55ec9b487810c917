use resumind_core::failure::Failure;

use super::state::{RetryLedger, RetryStatus};

/// Outcome of consulting the retry controller after the designated step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Run the same step again. Carries the attempt number being started.
    Retry { attempt: u32 },
    /// Ceiling reached. The error stays in place for the caller.
    Exhausted,
    /// The failure would not heal on a repeat.
    NotRetryable,
}

/// Bounded retry over a single fallible step.
///
/// `FRESH` (0 attempts) moves to `RETRYING` (1..=ceiling) and finally to
/// `EXHAUSTED`. The policy holds no per-run state; the ledger lives in the
/// run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub ceiling: u32,
}

impl RetryPolicy {
    pub fn new(ceiling: u32) -> Self {
        Self { ceiling }
    }

    pub fn decide(&self, ledger: &RetryLedger, failure: &Failure) -> RetryDecision {
        if !failure.is_retryable() {
            RetryDecision::NotRetryable
        } else if ledger.attempts < self.ceiling {
            RetryDecision::Retry {
                attempt: ledger.attempts + 1,
            }
        } else {
            RetryDecision::Exhausted
        }
    }

    /// Advance the ledger according to `decision`.
    pub fn record(ledger: &mut RetryLedger, decision: RetryDecision) {
        match decision {
            RetryDecision::Retry { attempt } => {
                ledger.attempts = attempt;
                ledger.status = RetryStatus::Retrying;
            }
            RetryDecision::Exhausted => ledger.status = RetryStatus::Exhausted,
            RetryDecision::NotRetryable => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resumind_core::failure::{FailureKind, ModelCause};

    fn flaky() -> Failure {
        Failure::new(FailureKind::Extraction(ModelCause::Validation), "empty output")
    }

    #[test]
    fn test_walks_fresh_retrying_exhausted() {
        let policy = RetryPolicy::new(2);
        let mut ledger = RetryLedger::default();
        assert_eq!(ledger.status, RetryStatus::Fresh);

        let d = policy.decide(&ledger, &flaky());
        assert_eq!(d, RetryDecision::Retry { attempt: 1 });
        RetryPolicy::record(&mut ledger, d);
        assert_eq!(ledger.status, RetryStatus::Retrying);

        let d = policy.decide(&ledger, &flaky());
        assert_eq!(d, RetryDecision::Retry { attempt: 2 });
        RetryPolicy::record(&mut ledger, d);
        assert_eq!(ledger.attempts, 2);

        let d = policy.decide(&ledger, &flaky());
        assert_eq!(d, RetryDecision::Exhausted);
        RetryPolicy::record(&mut ledger, d);
        assert_eq!(ledger.status, RetryStatus::Exhausted);
        assert_eq!(ledger.attempts, 2);
    }

    #[test]
    fn test_zero_ceiling_exhausts_immediately() {
        let policy = RetryPolicy::new(0);
        assert_eq!(
            policy.decide(&RetryLedger::default(), &flaky()),
            RetryDecision::Exhausted
        );
    }

    #[test]
    fn test_fatal_failure_is_not_retried() {
        let policy = RetryPolicy::new(5);
        let mut ledger = RetryLedger::default();
        let d = policy.decide(
            &ledger,
            &Failure::new(FailureKind::Extraction(ModelCause::Auth), "bad key"),
        );
        assert_eq!(d, RetryDecision::NotRetryable);
        RetryPolicy::record(&mut ledger, d);
        assert_eq!(ledger, RetryLedger::default());
    }
}
