//! Per-user ordering guard (§3 "SequenceChecker", §4.8): wraps a
//! [`BusinessTransition`] so every message handled in stress mode is checked
//! against the strictly monotonic `msg_id` sequence the synthesizer
//! produced for that key.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use relay_core::error::codes;
use relay_core::{CoreError, ErrorCategory};
use relay_processor::BusinessTransition;
use relay_vendor::UserMessage;

/// Tracks `expected_seq` for one user. `initialized` guards the first-call
/// baseline adoption described in §3: the first accepted `msg_id` becomes
/// the baseline rather than being checked against an assumed `1`.
struct PerUserSequence {
    expected_seq: AtomicI64,
    initialized: AtomicBool,
}

impl PerUserSequence {
    fn new() -> Self {
        Self { expected_seq: AtomicI64::new(0), initialized: AtomicBool::new(false) }
    }

    /// Returns `Ok(())` if `actual` matches the expected sequence value (or
    /// this is the first call for the user), `Err((expected, actual))`
    /// otherwise. Always advances `expected_seq` by one on acceptance.
    fn check(&self, actual: i64) -> Result<(), (i64, i64)> {
        if !self.initialized.swap(true, Ordering::AcqRel) {
            self.expected_seq.store(actual + 1, Ordering::Release);
            return Ok(());
        }

        let expected = self.expected_seq.load(Ordering::Acquire);
        if actual != expected {
            return Err((expected, actual));
        }
        self.expected_seq.store(expected + 1, Ordering::Release);
        Ok(())
    }
}

/// Per-user strict-monotonic `msg_id` ordering checker (§3, §4.8). Violations
/// increment a telemetry counter and log `(user_id, expected, actual)`.
pub struct SequenceChecker {
    sequences: DashMap<String, PerUserSequence>,
}

impl SequenceChecker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { sequences: DashMap::new() })
    }

    /// Parse `msg_id` as an integer and check it against the expected
    /// sequence for `user_id`. Returns `Err` on a malformed `msg_id` or a
    /// sequence violation; in both cases the caller should treat the
    /// message as a stress-mode ordering failure, not a business error.
    pub fn check(&self, user_id: &str, msg_id: &str) -> Result<(), CoreError> {
        let actual: i64 = msg_id.parse().map_err(|_| {
            CoreError::new(codes::RECORD_DECODE, ErrorCategory::Decode, format!("non-numeric msg_id: {msg_id}"))
        })?;

        let result = self.sequences.entry(user_id.to_string()).or_insert_with(PerUserSequence::new).check(actual);

        match result {
            Ok(()) => Ok(()),
            Err((expected, actual)) => {
                tracing::error!(user_id, expected, actual, "stress sequence violation detected");
                metrics::counter!("relay_stress_sequence_violations_total").increment(1);
                Err(CoreError::new(
                    codes::RECORD_DECODE,
                    ErrorCategory::Invalid,
                    format!("sequence violation for {user_id}: expected {expected}, got {actual}"),
                ))
            }
        }
    }
}

/// Decorates a [`BusinessTransition`] with a [`SequenceChecker`] pass before
/// the wrapped transition runs, per §4.8 "wraps its business transition".
pub struct SequenceCheckingTransition {
    checker: Arc<SequenceChecker>,
    inner: Arc<dyn BusinessTransition>,
}

impl SequenceCheckingTransition {
    pub fn new(checker: Arc<SequenceChecker>, inner: Arc<dyn BusinessTransition>) -> Self {
        Self { checker, inner }
    }
}

#[async_trait]
impl BusinessTransition for SequenceCheckingTransition {
    async fn handle(&self, external_user_id: &str, message: &UserMessage) -> Result<(), CoreError> {
        self.checker.check(external_user_id, &message.msg_id)?;
        self.inner.handle(external_user_id, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_call_adopts_baseline_without_requiring_one() {
        let checker = SequenceChecker::new();
        assert!(checker.check("user-1", "7").is_ok());
        assert!(checker.check("user-1", "8").is_ok());
    }

    #[test]
    fn gap_in_sequence_is_reported_as_violation() {
        let checker = SequenceChecker::new();
        checker.check("user-1", "1").unwrap();
        let err = checker.check("user-1", "3").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Invalid);
    }

    #[test]
    fn different_users_are_tracked_independently() {
        let checker = SequenceChecker::new();
        assert!(checker.check("user-1", "1").is_ok());
        assert!(checker.check("user-2", "1").is_ok());
        assert!(checker.check("user-1", "2").is_ok());
        assert!(checker.check("user-2", "2").is_ok());
    }

    #[test]
    fn non_numeric_msg_id_is_a_decode_error() {
        let checker = SequenceChecker::new();
        let err = checker.check("user-1", "not-a-number").unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Decode);
    }
}
