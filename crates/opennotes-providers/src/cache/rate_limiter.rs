//! Sliding-window rate limiter over a Redis sorted set.
//!
//! One atomic Lua script trims entries older than `now - window`, counts
//! the remainder, and either records the new request or rejects it, so
//! the limit is never exceeded within any window even under concurrent
//! checks. Backend failures fail open.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, warn};

use opennotes_domain::constants::RATE_LIMIT_KEY_PREFIX;
use opennotes_domain::ports::RateLimiter;
use opennotes_domain::value_objects::RateLimitDecision;

const SLIDING_WINDOW_SCRIPT: &str = r"
local key = KEYS[1]
local limit = tonumber(ARGV[1])
local window_start = tonumber(ARGV[2])
local current_time = tonumber(ARGV[3])
local window_seconds = tonumber(ARGV[4])
local member = ARGV[5]

local reset_at = current_time + window_seconds

redis.call('zremrangebyscore', key, '-inf', window_start)
local current_count = redis.call('zcard', key)

if current_count < limit then
    redis.call('zadd', key, current_time, member)
    redis.call('expire', key, window_seconds + 1)
    return {1, limit - current_count - 1, reset_at}
else
    return {0, 0, reset_at}
end
";

/// Redis sorted-set sliding-window limiter.
pub struct SlidingWindowRateLimiter {
    manager: Option<ConnectionManager>,
    script: Script,
}

impl SlidingWindowRateLimiter {
    #[must_use]
    pub fn new(manager: Option<ConnectionManager>) -> Self {
        if manager.is_none() {
            warn!("Redis not configured for rate limiting, all requests will be allowed");
        }
        Self {
            manager,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
        }
    }

    fn build_key(identifier: &str) -> String {
        format!("{RATE_LIMIT_KEY_PREFIX}{identifier}")
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowRateLimiter {
    async fn check(&self, identifier: &str, limit: u64, window: Duration) -> RateLimitDecision {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let window_seconds = window.as_secs();

        let Some(manager) = &self.manager else {
            return RateLimitDecision::fail_open(limit, now, window_seconds);
        };

        let window_start = now - window_seconds as i64;
        // Member carries a nonce so two requests in the same second both
        // count.
        let member = format!("{now}:{}", uuid::Uuid::new_v4().simple());

        let mut con = manager.clone();
        let result: Result<(i64, i64, i64), _> = self
            .script
            .key(Self::build_key(identifier))
            .arg(limit)
            .arg(window_start)
            .arg(now)
            .arg(window_seconds)
            .arg(member)
            .invoke_async(&mut con)
            .await;

        match result {
            Ok((allowed, remaining, reset_at)) => {
                let allowed = allowed == 1;
                RateLimitDecision {
                    allowed,
                    remaining: remaining.max(0) as u64,
                    reset_at,
                    retry_after: if allowed {
                        None
                    } else {
                        Some((reset_at - now).max(0) as u64)
                    },
                }
            }
            Err(e) => {
                error!(identifier, error = %e, "Rate limit check failed, allowing request");
                RateLimitDecision::fail_open(limit, now, window_seconds)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fails_open_without_backend() {
        let limiter = SlidingWindowRateLimiter::new(None);
        let decision = limiter.check("user:1", 10, Duration::from_secs(60)).await;
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 10);
        assert!(decision.retry_after.is_none());
    }
}
