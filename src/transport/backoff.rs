//! Reconnect delay policies.
//!
//! The delay between successive reconnect attempts is either fixed or
//! exponential with a cap. The attempt *count* is bounded separately by
//! `max_reconnect_attempts` in [`ConnectionConfig`](crate::config::ConnectionConfig).

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// BackoffPolicy
// ============================================================================

/// Delay strategy between successive reconnect attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BackoffPolicy {
    /// Same delay before every attempt.
    Fixed(Duration),

    /// Exponentially growing delay, capped at `max`.
    Exponential {
        /// Delay before the first reconnect attempt.
        initial: Duration,
        /// Upper bound on the delay.
        max: Duration,
        /// Multiplier applied per attempt.
        factor: f64,
    },
}

impl BackoffPolicy {
    /// Default exponential policy: 500ms doubling up to 30s.
    #[inline]
    #[must_use]
    pub const fn default_exponential() -> Self {
        Self::Exponential {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(30),
            factor: 2.0,
        }
    }

    /// Returns the delay before reconnect attempt `attempt` (1-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed(delay) => delay,
            Self::Exponential {
                initial,
                max,
                factor,
            } => {
                let exp = attempt.saturating_sub(1).min(32);
                let scaled = initial.as_secs_f64() * factor.powi(exp as i32);
                Duration::from_secs_f64(scaled.min(max.as_secs_f64()))
            }
        }
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::default_exponential()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_delay_constant() {
        let policy = BackoffPolicy::Fixed(Duration::from_millis(250));
        assert_eq!(policy.delay(1), Duration::from_millis(250));
        assert_eq!(policy.delay(10), Duration::from_millis(250));
    }

    #[test]
    fn test_exponential_growth() {
        let policy = BackoffPolicy::Exponential {
            initial: Duration::from_millis(100),
            max: Duration::from_secs(10),
            factor: 2.0,
        };
        assert_eq!(policy.delay(1), Duration::from_millis(100));
        assert_eq!(policy.delay(2), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(400));
    }

    #[test]
    fn test_exponential_capped() {
        let policy = BackoffPolicy::Exponential {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(5),
            factor: 10.0,
        };
        assert_eq!(policy.delay(4), Duration::from_secs(5));
        // Large attempt numbers must not overflow.
        assert_eq!(policy.delay(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_default_policy() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(1), Duration::from_millis(500));
    }

    mod properties {
        use super::*;

        use proptest::prelude::*;

        proptest! {
            #[test]
            fn delay_never_exceeds_cap(
                initial_ms in 1u64..10_000,
                max_ms in 1u64..120_000,
                factor in 1.0f64..16.0,
                attempt in 1u32..10_000,
            ) {
                let policy = BackoffPolicy::Exponential {
                    initial: Duration::from_millis(initial_ms),
                    max: Duration::from_millis(max_ms),
                    factor,
                };
                prop_assert!(policy.delay(attempt) <= Duration::from_millis(max_ms));
            }

            #[test]
            fn delay_is_nondecreasing(
                initial_ms in 1u64..10_000,
                max_ms in 1u64..120_000,
                factor in 1.0f64..16.0,
                attempt in 1u32..1_000,
            ) {
                let policy = BackoffPolicy::Exponential {
                    initial: Duration::from_millis(initial_ms),
                    max: Duration::from_millis(max_ms),
                    factor,
                };
                prop_assert!(policy.delay(attempt) <= policy.delay(attempt + 1));
            }
        }
    }
}
