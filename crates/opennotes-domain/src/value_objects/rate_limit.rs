//! Sliding-window rate limiter decision.

use serde::{Deserialize, Serialize};

/// Outcome of a rate-limit check for one identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u64,
    /// Unix seconds when the window resets.
    pub reset_at: i64,
    /// Seconds to wait before retrying; only set when rejected.
    pub retry_after: Option<u64>,
}

impl RateLimitDecision {
    /// Fail-open decision used when the cache backend is unavailable.
    #[must_use]
    pub fn fail_open(limit: u64, now: i64, window_seconds: u64) -> Self {
        Self {
            allowed: true,
            remaining: limit,
            reset_at: now + window_seconds as i64,
            retry_after: None,
        }
    }
}
