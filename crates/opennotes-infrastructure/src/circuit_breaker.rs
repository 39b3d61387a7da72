//! Per-dependency circuit breakers.
//!
//! CLOSED → (failures ≥ threshold) → OPEN → (reset timeout elapsed, on next
//! check) → HALF_OPEN → (success → CLOSED | failure → OPEN). While OPEN,
//! `check` refuses without exercising the dependency; HALF_OPEN admits a
//! single probe whose outcome decides the next state.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use opennotes_domain::error::{Error, Result};

/// Breaker state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
}

/// One named circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: std::sync::Mutex<BreakerInner>,
}

impl CircuitBreaker {
    #[must_use]
    pub fn new(name: &str, failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            name: name.to_owned(),
            failure_threshold: failure_threshold.max(1),
            reset_timeout,
            inner: std::sync::Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn state(&self) -> CircuitState {
        self.inner.lock().map(|i| i.state).unwrap_or(CircuitState::Open)
    }

    /// Gate a call. In OPEN, errors with `Error::CircuitOpen` unless the
    /// reset timeout has elapsed, in which case the breaker moves to
    /// HALF_OPEN and admits this single call.
    pub fn check(&self) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| Error::internal("circuit breaker poisoned"))?;
        if inner.state != CircuitState::Open {
            return Ok(());
        }

        let elapsed = inner.last_failure_at.map(|t| t.elapsed());
        if elapsed.is_some_and(|e| e >= self.reset_timeout) {
            inner.state = CircuitState::HalfOpen;
            info!(breaker = self.name, "Circuit breaker entering HALF_OPEN state");
            return Ok(());
        }

        let retry_in = elapsed
            .map(|e| self.reset_timeout.saturating_sub(e))
            .unwrap_or(self.reset_timeout);
        Err(Error::CircuitOpen {
            name: self.name.clone(),
            failures: inner.failure_count,
            retry_in_secs: retry_in.as_secs(),
        })
    }

    /// Record a successful call: resets the count and closes the breaker.
    pub fn record_success(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.state != CircuitState::Closed {
                info!(breaker = self.name, "Circuit breaker reset to CLOSED state");
            }
            inner.failure_count = 0;
            inner.state = CircuitState::Closed;
        }
    }

    /// Record a failed call: bumps the count, stamps the failure time, and
    /// opens at the threshold. A HALF_OPEN failure re-opens immediately.
    pub fn record_failure(&self) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.failure_count += 1;
            inner.last_failure_at = Some(Instant::now());
            if inner.state == CircuitState::HalfOpen
                || inner.failure_count >= self.failure_threshold
            {
                if inner.state != CircuitState::Open {
                    warn!(
                        breaker = self.name,
                        failures = inner.failure_count,
                        "Circuit breaker OPENED"
                    );
                }
                inner.state = CircuitState::Open;
            }
        }
    }

    /// Run `f` through the breaker.
    pub async fn call<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        self.check()?;
        match f().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(e)
            }
        }
    }
}

/// Process-wide registry of named breakers.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create a breaker. Re-registering an existing name with
    /// different parameters keeps the original and logs a warning.
    pub fn register(
        &self,
        name: &str,
        failure_threshold: u32,
        reset_timeout: Duration,
    ) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            let existing = Arc::clone(existing.value());
            if existing.failure_threshold != failure_threshold.max(1)
                || existing.reset_timeout != reset_timeout
            {
                warn!(
                    breaker = name,
                    "Circuit breaker already registered with different parameters, keeping original"
                );
            }
            return existing;
        }
        let breaker = Arc::new(CircuitBreaker::new(name, failure_threshold, reset_timeout));
        self.breakers.insert(name.to_owned(), Arc::clone(&breaker));
        breaker
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| Arc::clone(b.value()))
    }
}
