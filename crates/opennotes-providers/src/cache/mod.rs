//! Redis-backed cache, lock and rate-limiter providers.

mod locks;
mod rate_limiter;
mod redis_provider;

pub use locks::RechunkLockManager;
pub use rate_limiter::SlidingWindowRateLimiter;
pub use redis_provider::RedisCacheProvider;
