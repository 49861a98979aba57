//! Shared retry backoff policy
//!
//! One policy is used verbatim by the install orchestrator and by device
//! recovery pacing, so both back off identically against the same flaky
//! transport.

use std::time::Duration;

/// Default base delay in seconds
const DEFAULT_BASE_SECS: f64 = 1.0;

/// Default growth factor per attempt
const DEFAULT_MULTIPLIER: f64 = 1.5;

/// Default hard ceiling in seconds (10 minutes)
const DEFAULT_MAX_SECS: f64 = 600.0;

/// Deterministic exponential backoff with a hard ceiling.
///
/// `delay(attempt)` computes `base * multiplier^attempt`, clamped to the
/// ceiling. The sequence is non-decreasing and bounded for all attempt
/// indices.
///
/// Progression with the defaults (1s base, 1.5x multiplier):
/// 0: 1s, 1: 1.5s, 2: 2.3s, 3: 3.4s, 4: 5s, 5: 7.6s,
/// 6: 11s, 7: 17s, 8: 26s, 9: 38s, 10: 58s (~1m),
/// 11: 87s, 12: 130s (~2m), 13: 195s (~3m), 14: 292s (~5m),
/// 15: 438s (~7m), 16+: 600s (10m cap)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    base_secs: f64,
    multiplier: f64,
    max_secs: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_secs: DEFAULT_BASE_SECS,
            multiplier: DEFAULT_MULTIPLIER,
            max_secs: DEFAULT_MAX_SECS,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with explicit parameters.
    ///
    /// `base_secs` must be positive and `multiplier` at least 1.0, otherwise
    /// the non-decreasing invariant would not hold.
    pub fn new(base_secs: f64, multiplier: f64, max_secs: f64) -> Self {
        debug_assert!(base_secs > 0.0, "base delay must be positive");
        debug_assert!(multiplier >= 1.0, "multiplier must be >= 1.0");
        debug_assert!(max_secs >= base_secs, "ceiling must be >= base");
        Self {
            base_secs,
            multiplier,
            max_secs,
        }
    }

    /// Compute the wait before retry number `attempt` (0-indexed).
    ///
    /// Pure and deterministic: the same attempt index always maps to the same
    /// delay.
    pub fn delay(&self, attempt: u32) -> Duration {
        // powi saturates to +inf for large exponents, which min() then clamps
        let raw = self.base_secs * self.multiplier.powi(attempt as i32);
        Duration::from_secs_f64(raw.min(self.max_secs))
    }

    /// The hard ceiling as a Duration
    pub fn max_delay(&self) -> Duration {
        Duration::from_secs_f64(self.max_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_zero_is_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_secs_f64(1.0));

        let policy = RetryPolicy::new(0.5, 2.0, 60.0);
        assert_eq!(policy.delay(0), Duration::from_secs_f64(0.5));
    }

    #[test]
    fn test_default_progression() {
        let policy = RetryPolicy::default();
        let tolerance = 1e-9;

        assert!((policy.delay(0).as_secs_f64() - 1.0).abs() < tolerance);
        assert!((policy.delay(1).as_secs_f64() - 1.5).abs() < tolerance);
        assert!((policy.delay(2).as_secs_f64() - 2.25).abs() < tolerance);
    }

    #[test]
    fn test_clamped_at_ceiling() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(20), Duration::from_secs_f64(600.0));
        assert_eq!(policy.delay(100), Duration::from_secs_f64(600.0));
        // Exponent large enough that the raw value overflows to infinity
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs_f64(600.0));
    }

    #[test]
    fn test_monotonically_non_decreasing() {
        let policy = RetryPolicy::default();
        let mut prev = Duration::ZERO;
        for attempt in 0..64 {
            let d = policy.delay(attempt);
            assert!(
                d >= prev,
                "delay({}) = {:?} decreased from {:?}",
                attempt,
                d,
                prev
            );
            assert!(d <= policy.max_delay());
            prev = d;
        }
    }

    #[test]
    fn test_never_zero() {
        let policy = RetryPolicy::default();
        for attempt in 0..64 {
            assert!(policy.delay(attempt) > Duration::ZERO);
        }
    }

    #[test]
    fn test_flat_policy() {
        // multiplier 1.0 degenerates to a constant delay
        let policy = RetryPolicy::new(2.0, 1.0, 600.0);
        assert_eq!(policy.delay(0), policy.delay(50));
    }
}
