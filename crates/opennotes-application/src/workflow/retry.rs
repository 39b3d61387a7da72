//! Step retry policy.

use rand::Rng;
use std::time::Duration;

/// Automatic retry policy for declared workflow steps.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_interval: Duration,
    /// Multiplier applied per attempt.
    pub backoff_rate: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_interval: Duration::from_secs(1),
            backoff_rate: 2.0,
        }
    }
}

impl RetryPolicy {
    /// No retries: a single attempt.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_interval: Duration::ZERO,
            backoff_rate: 1.0,
        }
    }

    /// Backoff before retry number `attempt` (0-based), with up to 25%
    /// random jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_interval.as_millis() as f64 * self.backoff_rate.powi(attempt as i32);
        let base = base.min(Duration::from_secs(300).as_millis() as f64) as u64;
        let jitter = if base > 0 {
            rand::thread_rng().gen_range(0..=base / 4)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_by_backoff_rate() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_interval: Duration::from_millis(100),
            backoff_rate: 2.0,
        };
        assert!(policy.delay_for(0) >= Duration::from_millis(100));
        assert!(policy.delay_for(0) <= Duration::from_millis(125));
        assert!(policy.delay_for(2) >= Duration::from_millis(400));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 20,
            base_interval: Duration::from_secs(10),
            backoff_rate: 10.0,
        };
        assert!(policy.delay_for(15) <= Duration::from_secs(375));
    }

    #[test]
    fn none_is_single_attempt() {
        assert_eq!(RetryPolicy::none().max_attempts, 1);
    }
}
