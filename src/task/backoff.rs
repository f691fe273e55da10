//! Retry backoff: decides how long a failed task waits before re-entering
//! the queue.

use crate::task::types::QueueConfig;
use std::time::Duration;

/// Exponential backoff capped at a maximum delay.
///
/// `delay(n) = min(multiplier^n * base, max_delay)` where `n` is the number of
/// attempts already made, so the first retry waits `multiplier * base`.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base,
            multiplier,
            max_delay,
        }
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(
            config.backoff_base(),
            config.backoff_multiplier,
            config.max_backoff_delay(),
        )
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let nanos = self.base.as_nanos() as f64 * self.multiplier.powi(exponent);

        if !nanos.is_finite() || nanos >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(nanos.round() as u64).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(100), 2.0, Duration::from_millis(1_000))
    }

    #[test]
    fn test_delay_follows_formula() {
        let policy = policy();
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = policy();
        assert_eq!(policy.delay_for(4), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(50), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_millis(1_000));
    }

    #[test]
    fn test_delay_is_non_decreasing() {
        let policy = BackoffPolicy::new(Duration::from_millis(7), 1.5, Duration::from_secs(3));
        let mut previous = Duration::ZERO;
        for attempt in 0..40 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= previous, "attempt {} went backwards", attempt);
            assert!(delay <= policy.max_delay);
            previous = delay;
        }
    }

    #[test]
    fn test_from_config() {
        let config = QueueConfig::default();
        let policy = BackoffPolicy::from_config(&config);
        assert_eq!(policy.base, Duration::from_secs(1));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
    }
}
