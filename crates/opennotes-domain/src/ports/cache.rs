//! Cache, lock and rate-limiter ports.

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;
use crate::value_objects::RateLimitDecision;

/// Handler invoked for each message received on a subscribed channel.
pub type CacheSubscriptionHandler =
    Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync + 'static>;

/// Key/value store abstraction over the cache backend.
///
/// Implementations must degrade loudly but gracefully: a lost backend is an
/// `Error::Cache`, never a panic.
#[async_trait]
pub trait CacheProvider: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set a value, optionally with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Delete a key; returns whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Keys matching a glob-style pattern.
    async fn keys(&self, pattern: &str) -> Result<Vec<String>>;

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    /// Atomically increment a hash field; returns the new value.
    ///
    /// This is the only safe way to bump shared counters under concurrent
    /// writers.
    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64>;

    /// Read all fields of a hash.
    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>>;

    /// Set a hash field without touching the others.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Set or refresh a key's TTL.
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Add a member to a set.
    async fn sadd(&self, key: &str, member: &str) -> Result<()>;

    /// Remove a member from a set.
    async fn srem(&self, key: &str, member: &str) -> Result<()>;

    /// All members of a set.
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    /// Fire-and-forget publish on a pub/sub channel.
    async fn publish(&self, channel: &str, message: &str) -> Result<()>;

    /// Spawn a background task delivering channel messages to `handler`.
    ///
    /// Task handles are tracked; [`CacheProvider::stop`] cancels every
    /// tracked task, best-effort unsubscribes, and clears the list so
    /// repeated subscribe/stop cycles never leak tasks.
    async fn subscribe(&self, channel: &str, handler: CacheSubscriptionHandler) -> Result<()>;

    /// Cancel all subscription tasks and close pub/sub connections.
    async fn stop(&self) -> Result<()>;
}

/// Distributed named lock for rechunk mutual exclusion.
///
/// When the backend is unavailable the lock degrades permissively: acquire
/// returns true, release returns true (no-op), `is_locked` returns false. A
/// warning is logged so the degradation is visible.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Try to take the lock; returns whether it was newly acquired.
    async fn acquire(&self, operation: &str, resource_id: Option<&str>, ttl: Duration) -> bool;

    /// Release the lock; returns whether a lock was actually deleted.
    async fn release(&self, operation: &str, resource_id: Option<&str>) -> bool;

    /// Whether the lock is currently held.
    async fn is_locked(&self, operation: &str, resource_id: Option<&str>) -> bool;
}

/// Sliding-window rate limiter.
///
/// Never exceeds `limit` within any window of `window` seconds; fails open
/// when the backend is down.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    async fn check(&self, identifier: &str, limit: u64, window: Duration) -> RateLimitDecision;
}
