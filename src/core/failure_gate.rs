//! Consecutive-failure hysteresis.
//!
//! A single transient failure after good data is a flake: the provider card
//! keeps showing the last-good numbers with no error indicator. The second
//! consecutive failure, or any failure with no prior success, is surfaced.
//! Fatal error classes (tool not installed) bypass the grace entirely.

use serde::{Deserialize, Serialize};

/// Per-provider failure-gate state machine.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsecutiveFailureGate {
    /// Consecutive failures since the last success. Reset to 0 on success.
    streak: u32,
    /// Whether this gate has ever recorded a success.
    had_success: bool,
}

impl ConsecutiveFailureGate {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            streak: 0,
            had_success: false,
        }
    }

    /// Record a successful probe. Resets the streak.
    pub const fn record_success(&mut self) {
        self.streak = 0;
        self.had_success = true;
    }

    /// Record a failed probe and decide whether to surface it.
    ///
    /// `transient` is the error's gate eligibility
    /// ([`crate::error::MeterError::is_transient`]); non-transient failures
    /// are surfaced immediately regardless of streak.
    pub const fn record_failure(&mut self, transient: bool) -> bool {
        self.streak = self.streak.saturating_add(1);
        if !transient {
            return true;
        }
        !self.had_success || self.streak >= 2
    }

    /// Current consecutive-failure streak.
    #[must_use]
    pub const fn streak(&self) -> u32 {
        self.streak
    }

    /// Reset to the initial state. Used when a provider is disabled.
    pub const fn reset(&mut self) {
        self.streak = 0;
        self.had_success = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_failure_without_prior_success_surfaces() {
        let mut gate = ConsecutiveFailureGate::new();
        assert!(gate.record_failure(true));
    }

    #[test]
    fn single_flake_after_success_is_suppressed() {
        let mut gate = ConsecutiveFailureGate::new();
        gate.record_success();
        assert!(!gate.record_failure(true));
    }

    #[test]
    fn second_consecutive_failure_surfaces() {
        let mut gate = ConsecutiveFailureGate::new();
        gate.record_success();
        assert!(!gate.record_failure(true));
        assert!(gate.record_failure(true));
        // And every failure after that.
        assert!(gate.record_failure(true));
    }

    #[test]
    fn success_between_failures_resets_the_streak() {
        let mut gate = ConsecutiveFailureGate::new();
        gate.record_success();
        assert!(!gate.record_failure(true));
        gate.record_success();
        assert!(!gate.record_failure(true));
    }

    #[test]
    fn fatal_failure_bypasses_grace() {
        let mut gate = ConsecutiveFailureGate::new();
        gate.record_success();
        assert!(gate.record_failure(false));
    }

    #[test]
    fn gate_property_over_sequences() {
        // Surfaced iff no prior success, or >= 2 consecutive failures.
        let sequences: &[(&[bool], &[bool])] = &[
            // (calls: true=success, false=failure) -> expected surfaced per failure
            (&[true, false, false], &[false, true]),
            (&[true, false, true], &[false]),
            (&[false, false], &[true, true]),
            (&[true, true, false], &[false]),
        ];

        for (calls, expected) in sequences {
            let mut gate = ConsecutiveFailureGate::new();
            let mut surfaced = Vec::new();
            for call in *calls {
                if *call {
                    gate.record_success();
                } else {
                    surfaced.push(gate.record_failure(true));
                }
            }
            assert_eq!(&surfaced, expected, "sequence {calls:?}");
        }
    }

    #[test]
    fn reset_clears_success_history() {
        let mut gate = ConsecutiveFailureGate::new();
        gate.record_success();
        gate.reset();
        // Back to lifetime start: first failure surfaces again.
        assert!(gate.record_failure(true));
    }
}
