//! Distributed lock manager for rechunk operations.
//!
//! SET NX with TTL on `rechunk:lock:<operation>[:<resource_id>]`. The TTL
//! is a safety net; workers release locks explicitly. When Redis is
//! unavailable the manager is permissive: acquire allows the operation,
//! release no-ops, `is_locked` reports unlocked. A warning makes the
//! degradation visible in logs.

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{error, info, warn};

use opennotes_domain::constants::RECHUNK_LOCK_PREFIX;
use opennotes_domain::ports::LockManager;

/// Redis-backed named lock manager.
pub struct RechunkLockManager {
    manager: Option<ConnectionManager>,
}

impl RechunkLockManager {
    #[must_use]
    pub fn new(manager: Option<ConnectionManager>) -> Self {
        Self { manager }
    }

    fn lock_key(operation: &str, resource_id: Option<&str>) -> String {
        match resource_id {
            Some(resource_id) => format!("{RECHUNK_LOCK_PREFIX}:{operation}:{resource_id}"),
            None => format!("{RECHUNK_LOCK_PREFIX}:{operation}"),
        }
    }
}

#[async_trait]
impl LockManager for RechunkLockManager {
    async fn acquire(&self, operation: &str, resource_id: Option<&str>, ttl: Duration) -> bool {
        let Some(manager) = &self.manager else {
            warn!("Redis not available, allowing operation without lock");
            return true;
        };
        let key = Self::lock_key(operation, resource_id);
        let mut con = manager.clone();
        let result: Result<Option<String>, _> = redis::cmd("SET")
            .arg(&key)
            .arg("locked")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut con)
            .await;

        match result {
            Ok(Some(_)) => {
                info!(operation, resource_id = ?resource_id, key, "Acquired rechunk lock");
                true
            }
            Ok(None) => false,
            Err(e) => {
                error!(operation, resource_id = ?resource_id, error = %e, "Failed to acquire rechunk lock");
                true
            }
        }
    }

    async fn release(&self, operation: &str, resource_id: Option<&str>) -> bool {
        let Some(manager) = &self.manager else {
            warn!("Redis not available, lock release is a no-op");
            return true;
        };
        let key = Self::lock_key(operation, resource_id);
        let mut con = manager.clone();
        match con.del::<_, i64>(&key).await {
            Ok(removed) => {
                if removed > 0 {
                    info!(operation, resource_id = ?resource_id, "Released rechunk lock");
                }
                removed > 0
            }
            Err(e) => {
                error!(operation, resource_id = ?resource_id, error = %e, "Failed to release rechunk lock");
                true
            }
        }
    }

    async fn is_locked(&self, operation: &str, resource_id: Option<&str>) -> bool {
        let Some(manager) = &self.manager else {
            return false;
        };
        let key = Self::lock_key(operation, resource_id);
        let mut con = manager.clone();
        match con.exists::<_, bool>(&key).await {
            Ok(exists) => exists,
            Err(e) => {
                error!(operation, resource_id = ?resource_id, error = %e, "Failed to check rechunk lock");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_includes_optional_resource() {
        assert_eq!(
            RechunkLockManager::lock_key("fact_check", Some("abc")),
            "rechunk:lock:fact_check:abc"
        );
        assert_eq!(
            RechunkLockManager::lock_key("previously_seen", None),
            "rechunk:lock:previously_seen"
        );
    }

    #[tokio::test]
    async fn permissive_without_backend() {
        let locks = RechunkLockManager::new(None);
        assert!(locks.acquire("fact_check", Some("c1"), Duration::from_secs(60)).await);
        assert!(locks.release("fact_check", Some("c1")).await);
        assert!(!locks.is_locked("fact_check", Some("c1")).await);
    }
}
