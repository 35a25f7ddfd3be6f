//! Reconnect backoff policy.
//!
//! [`BackoffPolicy`] computes the delay before the next reconnect attempt
//! from the attempt count alone. The base delay doubles each attempt and
//! is capped, then a jitter of up to a quarter of the capped delay is
//! added to spread simultaneous retries, and the result is capped again.
//!
//! The attempt counter grows without bound across repeated failures, but
//! the resulting delay saturates at the cap, so behavior does not degrade
//! for very long outages.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use sockpool::BackoffPolicy;
//!
//! let backoff = BackoffPolicy::new(Duration::from_millis(500), Duration::from_secs(30));
//!
//! // Attempt 0 delay is within [base, 1.25 * base].
//! let delay = backoff.next_delay(0);
//! assert!(delay >= Duration::from_millis(500));
//! assert!(delay <= Duration::from_millis(625));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use rand::Rng;

// ============================================================================
// Constants
// ============================================================================

/// Fraction of the capped delay drawn as jitter.
const JITTER_RATIO: f64 = 0.25;

// ============================================================================
// BackoffPolicy
// ============================================================================

/// Exponential, capped, jittered reconnect delay policy.
///
/// `next_delay(attempt) = min(max, min(max, base * 2^attempt) + jitter)`
/// where `jitter` is uniform in `[0, 0.25 * min(max, base * 2^attempt)]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Base delay for the first attempt.
    base: Duration,
    /// Maximum delay cap.
    max: Duration,
}

impl Default for BackoffPolicy {
    /// Returns a policy with a 500ms base and a 30s cap.
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(30))
    }
}

impl BackoffPolicy {
    /// Creates a new policy.
    ///
    /// The cap is clamped so that `max >= base`; configuration never
    /// fails.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Returns the base delay.
    #[inline]
    #[must_use]
    pub const fn base(&self) -> Duration {
        self.base
    }

    /// Returns the delay cap.
    #[inline]
    #[must_use]
    pub const fn max(&self) -> Duration {
        self.max
    }

    /// Computes the delay before the given reconnect attempt (0-indexed).
    ///
    /// `attempt` is the entry's reconnect counter *before* it is
    /// incremented for this scheduling. A zero delay means immediate
    /// retry, bounded only by the scheduler.
    #[must_use]
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let capped = self.capped_base(attempt);
        let capped_secs = capped.as_secs_f64();

        let bound = JITTER_RATIO * capped_secs;
        let jitter_secs = if bound > 0.0 {
            rand::rng().random_range(0.0..=bound)
        } else {
            0.0
        };

        let total = Duration::from_secs_f64(capped_secs + jitter_secs);
        total.min(self.max)
    }

    /// Returns `base * 2^attempt` clamped to the cap.
    fn capped_base(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let unclamped = self.base.as_secs_f64() * 2f64.powi(exp);

        if !unclamped.is_finite() || unclamped > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(unclamped)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_delay_within_bounds() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(30));
        for attempt in 0..40 {
            let delay = policy.next_delay(attempt);
            assert!(delay >= Duration::from_millis(100), "attempt {attempt}");
            assert!(delay <= Duration::from_secs(30), "attempt {attempt}");
        }
    }

    #[test]
    fn test_first_attempt_jitter_window() {
        let policy = BackoffPolicy::new(Duration::from_millis(400), Duration::from_secs(30));
        for _ in 0..100 {
            let delay = policy.next_delay(0);
            assert!(delay >= Duration::from_millis(400));
            assert!(delay <= Duration::from_millis(500));
        }
    }

    #[test]
    fn test_exponential_growth() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(60));
        // Delay floor doubles each attempt until the cap.
        assert!(policy.next_delay(1) >= Duration::from_millis(200));
        assert!(policy.next_delay(2) >= Duration::from_millis(400));
        assert!(policy.next_delay(3) >= Duration::from_millis(800));
    }

    #[test]
    fn test_saturates_at_max() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1));
        for _ in 0..100 {
            assert_eq!(policy.next_delay(30), Duration::from_secs(1));
        }
    }

    #[test]
    fn test_huge_attempt_clamps_to_max() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(10));
        assert_eq!(policy.next_delay(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_constructor_clamps_inverted_range() {
        let policy = BackoffPolicy::new(Duration::from_secs(10), Duration::from_secs(5));
        assert_eq!(policy.base(), Duration::from_secs(10));
        assert_eq!(policy.max(), Duration::from_secs(10));
        assert_eq!(policy.next_delay(0), Duration::from_secs(10));
    }

    #[test]
    fn test_zero_base_is_immediate() {
        let policy = BackoffPolicy::new(Duration::ZERO, Duration::ZERO);
        assert_eq!(policy.next_delay(0), Duration::ZERO);
        assert_eq!(policy.next_delay(17), Duration::ZERO);
    }

    #[test]
    fn test_default_policy() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.base(), Duration::from_millis(500));
        assert_eq!(policy.max(), Duration::from_secs(30));
    }

    proptest! {
        #[test]
        fn prop_delay_bounded(base_ms in 0u64..5_000, span_ms in 0u64..60_000, attempt in 0u32..1_000) {
            let base = Duration::from_millis(base_ms);
            let max = Duration::from_millis(base_ms + span_ms);
            let policy = BackoffPolicy::new(base, max);
            let delay = policy.next_delay(attempt);
            prop_assert!(delay >= base.min(max));
            prop_assert!(delay <= max);
        }
    }
}
