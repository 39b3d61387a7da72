//! Deadlock retry for database operations.
//!
//! PostgreSQL reports deadlocks as SQLSTATE 40P01; concurrent
//! INSERT ... ON CONFLICT can hit them under load. Such operations retry
//! with exponential backoff plus jitter; any other error returns
//! immediately.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use opennotes_domain::error::{Error, Result};

/// PostgreSQL deadlock SQLSTATE.
pub const DEADLOCK_SQLSTATE: &str = "40P01";

/// Retry tuning.
#[derive(Debug, Clone, Copy)]
pub struct DeadlockRetry {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter fraction of the computed delay, in [0, 1].
    pub jitter: f64,
}

impl Default for DeadlockRetry {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            jitter: 0.25,
        }
    }
}

/// Whether an error is a PostgreSQL deadlock (by SQLSTATE in the message
/// chain).
#[must_use]
pub fn is_deadlock(error: &Error) -> bool {
    match error {
        Error::Database { message, source } => {
            message.contains(DEADLOCK_SQLSTATE)
                || source
                    .as_ref()
                    .is_some_and(|s| s.to_string().contains(DEADLOCK_SQLSTATE))
        }
        _ => false,
    }
}

impl DeadlockRetry {
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base_delay.as_millis() as f64 * 2f64.powi(attempt as i32);
        let capped = exp.min(self.max_delay.as_millis() as f64);
        let jitter_max = (capped * self.jitter) as u64;
        let jitter = if jitter_max > 0 {
            rand::thread_rng().gen_range(0..=jitter_max)
        } else {
            0
        };
        Duration::from_millis(capped as u64 + jitter)
    }

    /// Run `op` retrying deadlocks up to `max_attempts` total attempts.
    pub async fn run<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if is_deadlock(&e) && attempt + 1 < self.max_attempts => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Deadlock detected, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn deadlock_error() -> Error {
        Error::database(format!("deadlock detected (SQLSTATE {DEADLOCK_SQLSTATE})"))
    }

    #[test]
    fn detects_deadlock_by_sqlstate() {
        assert!(is_deadlock(&deadlock_error()));
        assert!(!is_deadlock(&Error::database("unique violation (SQLSTATE 23505)")));
        assert!(!is_deadlock(&Error::validation("nope")));
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let calls = AtomicU32::new(0);
        let result = DeadlockRetry::default()
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(7)
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_deadlock_then_succeeds() {
        let calls = AtomicU32::new(0);
        let retry = DeadlockRetry {
            base_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let result = retry
            .run(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(deadlock_error())
                } else {
                    Ok(42)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let retry = DeadlockRetry {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            ..Default::default()
        };
        let result: Result<()> = retry
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(deadlock_error())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_deadlock_errors_do_not_retry() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = DeadlockRetry::default()
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::validation("bad input"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
