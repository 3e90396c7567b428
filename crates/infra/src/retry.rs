//! Retry policy shared by workflow steps and the outbox relay.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential backoff: `initial * multiplier^(attempt-1)`, capped at `max_interval`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one; `None` retries forever.
    pub max_attempts: Option<u32>,
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// 3 attempts, 1s initial, 60s cap, x2.
    fn default() -> Self {
        Self {
            max_attempts: Some(3),
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn exponential(max_attempts: u32, initial_interval: Duration, max_interval: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            initial_interval,
            max_interval,
            ..Default::default()
        }
    }

    /// No attempt limit (outbox delivery retries until acknowledged).
    pub fn unbounded(initial_interval: Duration, max_interval: Duration) -> Self {
        Self {
            max_attempts: None,
            initial_interval,
            max_interval,
            ..Default::default()
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay to wait after failed attempt number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.initial_interval.as_millis() as f64;
        let max_ms = self.max_interval.as_millis() as f64;
        let exp = self.multiplier.max(1.0).powi(attempt.saturating_sub(1).min(64) as i32);

        Duration::from_millis((base_ms * exp).min(max_ms).max(0.0) as u64)
    }

    /// Whether another attempt may follow failed attempt number `attempt`.
    pub fn should_retry(&self, attempt: u32) -> bool {
        self.max_attempts.is_none_or(|max| attempt < max)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn default_policy_matches_provisioning_defaults() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(60));
    }

    #[test]
    fn should_retry_respects_max_attempts() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn unbounded_policy_always_retries_with_capped_delay() {
        let policy = RetryPolicy::unbounded(Duration::from_millis(10), Duration::from_millis(50));

        assert!(policy.should_retry(1_000));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(10));
        assert_eq!(policy.delay_for_attempt(500), Duration::from_millis(50));
    }

    #[test]
    fn custom_multiplier() {
        let policy = RetryPolicy::exponential(5, Duration::from_millis(100), Duration::from_secs(10))
            .with_multiplier(3.0);

        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(300));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(900));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: delays never shrink between attempts and never exceed the cap.
        #[test]
        fn delays_are_monotonic_and_capped(
            initial_ms in 0u64..5_000,
            max_ms in 0u64..120_000,
            multiplier in 1.0f64..4.0,
            attempt in 1u32..200,
        ) {
            let policy = RetryPolicy::unbounded(
                Duration::from_millis(initial_ms),
                Duration::from_millis(max_ms),
            )
            .with_multiplier(multiplier);

            let current = policy.delay_for_attempt(attempt);
            let next = policy.delay_for_attempt(attempt + 1);
            prop_assert!(current <= next);
            prop_assert!(next <= Duration::from_millis(max_ms));
        }
    }
}
