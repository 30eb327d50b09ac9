//! Broker-side redelivery policy with exponential backoff.
//!
//! The consumer never retries locally. When it withholds acknowledgment, the broker
//! layer consults a [`RedeliveryPolicy`] to decide whether the record is handed out
//! again (after a backoff) or parked in the dead-letter destination.
//!
//! Attempts are 1-based: the first delivery is attempt 1. With `max_attempts = 3` a
//! record is dispatched at most three times.
//!
//! # Example
//!
//! ```rust
//! use notifier_runtime::redelivery::{RedeliveryDecision, RedeliveryPolicy};
//! use std::time::Duration;
//!
//! let policy = RedeliveryPolicy::builder()
//!     .max_attempts(3)
//!     .initial_delay(Duration::from_millis(100))
//!     .multiplier(2.0)
//!     .build();
//!
//! assert_eq!(policy.decide(1), RedeliveryDecision::RetryAfter(Duration::from_millis(100)));
//! assert_eq!(policy.decide(2), RedeliveryDecision::RetryAfter(Duration::from_millis(200)));
//! assert_eq!(policy.decide(3), RedeliveryDecision::Exhausted);
//! ```

use std::time::Duration;

/// Redelivery policy configuration.
///
/// # Default Values
///
/// - `max_attempts`: 10
/// - `initial_delay`: 1 second
/// - `max_delay`: 60 seconds
/// - `multiplier`: 2.0 (delay doubles each attempt)
#[derive(Debug, Clone, PartialEq)]
pub struct RedeliveryPolicy {
    /// Total deliveries allowed before the record is dead-lettered
    pub max_attempts: u32,
    /// Delay before the first redelivery
    pub initial_delay: Duration,
    /// Cap for exponential backoff
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RedeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Outcome of consulting the policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedeliveryDecision {
    /// Hand the record out again after this delay.
    RetryAfter(Duration),
    /// Out of attempts; dead-letter the record.
    Exhausted,
}

impl RedeliveryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RedeliveryPolicyBuilder {
        RedeliveryPolicyBuilder {
            max_attempts: None,
            initial_delay: None,
            max_delay: None,
            multiplier: None,
        }
    }

    /// Delay before redelivering a record whose `attempt`-th delivery just failed.
    ///
    /// `delay = initial_delay * multiplier ^ (attempt - 1)`, capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        if exponent == 0 {
            return self.initial_delay.min(self.max_delay);
        }

        let exponent = i32::try_from(exponent).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }

        Duration::from_millis(delay_ms as u64)
    }

    /// Decide what happens after the `attempt`-th delivery failed.
    #[must_use]
    pub fn decide(&self, attempt: u32) -> RedeliveryDecision {
        if attempt >= self.max_attempts {
            RedeliveryDecision::Exhausted
        } else {
            RedeliveryDecision::RetryAfter(self.delay_for_attempt(attempt))
        }
    }
}

/// Builder for [`RedeliveryPolicy`].
#[derive(Debug, Clone)]
pub struct RedeliveryPolicyBuilder {
    max_attempts: Option<u32>,
    initial_delay: Option<Duration>,
    max_delay: Option<Duration>,
    multiplier: Option<f64>,
}

impl RedeliveryPolicyBuilder {
    /// Set the total number of deliveries allowed (minimum 1).
    #[must_use]
    pub const fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Set delay before the first redelivery.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = Some(delay);
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = Some(delay);
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = Some(multiplier);
        self
    }

    /// Build the [`RedeliveryPolicy`].
    #[must_use]
    pub fn build(self) -> RedeliveryPolicy {
        let defaults = RedeliveryPolicy::default();
        RedeliveryPolicy {
            max_attempts: self.max_attempts.unwrap_or(defaults.max_attempts).max(1),
            initial_delay: self.initial_delay.unwrap_or(defaults.initial_delay),
            max_delay: self.max_delay.unwrap_or(defaults.max_delay),
            multiplier: self.multiplier.unwrap_or(defaults.multiplier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_calculation() {
        let policy = RedeliveryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(10))
            .build();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(800));
    }

    #[test]
    fn test_max_delay_cap() {
        let policy = RedeliveryPolicy::builder()
            .initial_delay(Duration::from_millis(1000))
            .multiplier(10.0)
            .max_delay(Duration::from_secs(2))
            .build();

        assert_eq!(policy.delay_for_attempt(6), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(2));
    }

    #[test]
    fn test_attempts_past_i32_range_stay_capped() {
        let policy = RedeliveryPolicy::builder()
            .max_attempts(u32::MAX)
            .initial_delay(Duration::from_millis(10))
            .max_delay(Duration::from_secs(60))
            .build();

        let boundary = 1u32 << 31;
        for attempt in [boundary - 1, boundary, boundary + 1, u32::MAX - 1] {
            assert_eq!(
                policy.decide(attempt),
                RedeliveryDecision::RetryAfter(Duration::from_secs(60)),
                "attempt {attempt}"
            );
        }
    }

    #[test]
    fn test_exhaustion_at_max_attempts() {
        let policy = RedeliveryPolicy::builder()
            .max_attempts(3)
            .initial_delay(Duration::from_millis(10))
            .build();

        assert!(matches!(policy.decide(1), RedeliveryDecision::RetryAfter(_)));
        assert!(matches!(policy.decide(2), RedeliveryDecision::RetryAfter(_)));
        assert_eq!(policy.decide(3), RedeliveryDecision::Exhausted);
        assert_eq!(policy.decide(4), RedeliveryDecision::Exhausted);
    }

    #[test]
    fn test_single_attempt_policy_never_redelivers() {
        let policy = RedeliveryPolicy::builder().max_attempts(0).build();
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.decide(1), RedeliveryDecision::Exhausted);
    }
}
