//! Token-bucket pool repository: a database-backed weighted semaphore.
//!
//! Acquire runs inside one transaction holding the pool row lock, so
//! concurrent acquirers serialize and the capacity invariant
//! (Σ open weights ≤ capacity) holds at every instant.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::PgPool;
use tracing::debug;
use uuid::Uuid;

use opennotes_domain::entities::{OpenHold, PoolStatus};
use opennotes_domain::error::Result;
use opennotes_domain::ports::TokenBucketRepository;

use super::db_err;

/// sqlx-backed token bucket.
pub struct PgTokenBucketRepository {
    pool: PgPool,
}

impl PgTokenBucketRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenBucketRepository for PgTokenBucketRepository {
    async fn try_acquire(&self, pool_name: &str, weight: i64, workflow_id: &str) -> Result<bool> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err("Failed to begin acquire transaction", e))?;

        // 1. Idempotency: an open hold for this workflow already counts.
        let existing: Option<Uuid> = sqlx::query_scalar(
            "SELECT h.id FROM token_holds h \
             JOIN token_bucket_pools p ON p.id = h.pool_id \
             WHERE p.name = $1 AND h.workflow_id = $2 AND h.released_at IS NULL",
        )
        .bind(pool_name)
        .bind(workflow_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_err("Failed to check existing hold", e))?;
        if existing.is_some() {
            return Ok(true);
        }

        // 2. Pool row lock serializes all acquirers on this pool.
        let pool_row = sqlx::query(
            "SELECT id, capacity FROM token_bucket_pools WHERE name = $1 FOR UPDATE",
        )
        .bind(pool_name)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_err("Failed to lock pool", e))?;
        let Some(pool_row) = pool_row else {
            return Ok(false);
        };
        let pool_id: Uuid = pool_row.try_get("id").map_err(|e| db_err("read pool id", e))?;
        let capacity: i64 = pool_row
            .try_get("capacity")
            .map_err(|e| db_err("read capacity", e))?;

        // 3. Capacity check over open holds.
        let held: i64 = sqlx::query_scalar(
            "SELECT COALESCE(SUM(weight), 0)::bigint FROM token_holds \
             WHERE pool_id = $1 AND released_at IS NULL",
        )
        .bind(pool_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_err("Failed to sum open holds", e))?;

        if held + weight > capacity {
            debug!(pool_name, workflow_id, held, weight, capacity, "Acquire refused");
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO token_holds (id, pool_id, workflow_id, weight, acquired_at) \
             VALUES ($1, $2, $3, $4, NOW())",
        )
        .bind(Uuid::now_v7())
        .bind(pool_id)
        .bind(workflow_id)
        .bind(weight)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_err("Failed to insert hold", e))?;

        tx.commit()
            .await
            .map_err(|e| db_err("Failed to commit acquire", e))?;
        debug!(pool_name, workflow_id, weight, "Tokens acquired");
        Ok(true)
    }

    async fn release(&self, pool_name: &str, workflow_id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE token_holds h SET released_at = NOW() \
             FROM token_bucket_pools p \
             WHERE p.id = h.pool_id AND p.name = $1 AND h.workflow_id = $2 \
               AND h.released_at IS NULL",
        )
        .bind(pool_name)
        .bind(workflow_id)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to release hold", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn status(&self, pool_name: &str) -> Result<Option<PoolStatus>> {
        let pool_row = sqlx::query("SELECT id, capacity FROM token_bucket_pools WHERE name = $1")
            .bind(pool_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_err("Failed to load pool", e))?;
        let Some(pool_row) = pool_row else {
            return Ok(None);
        };
        let pool_id: Uuid = pool_row.try_get("id").map_err(|e| db_err("read pool id", e))?;
        let capacity: i64 = pool_row
            .try_get("capacity")
            .map_err(|e| db_err("read capacity", e))?;

        let rows = sqlx::query(
            "SELECT workflow_id, weight, acquired_at FROM token_holds \
             WHERE pool_id = $1 AND released_at IS NULL ORDER BY acquired_at ASC",
        )
        .bind(pool_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to list open holds", e))?;

        let open_holds: Vec<OpenHold> = rows
            .iter()
            .map(|row| {
                Ok(OpenHold {
                    workflow_id: row
                        .try_get("workflow_id")
                        .map_err(|e| db_err("read workflow_id", e))?,
                    weight: row.try_get("weight").map_err(|e| db_err("read weight", e))?,
                    acquired_at: row
                        .try_get("acquired_at")
                        .map_err(|e| db_err("read acquired_at", e))?,
                })
            })
            .collect::<Result<_>>()?;

        let held: i64 = open_holds.iter().map(|h| h.weight).sum();
        Ok(Some(PoolStatus {
            name: pool_name.to_owned(),
            capacity,
            held,
            available: capacity - held,
            open_holds,
        }))
    }

    async fn reclaim_expired(&self, terminal_before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE token_holds h SET released_at = NOW() \
             FROM workflow_executions w \
             WHERE w.workflow_id = h.workflow_id \
               AND h.released_at IS NULL \
               AND w.status IN ('succeeded', 'failed', 'cancelled') \
               AND w.updated_at < $1",
        )
        .bind(terminal_before)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to reclaim holds", e))?;
        Ok(result.rows_affected())
    }

    async fn ensure_pool(&self, pool_name: &str, capacity: i64) -> Result<()> {
        sqlx::query(
            "INSERT INTO token_bucket_pools (id, name, capacity, created_at) \
             VALUES ($1, $2, $3, NOW()) \
             ON CONFLICT (name) DO NOTHING",
        )
        .bind(Uuid::now_v7())
        .bind(pool_name)
        .bind(capacity)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to ensure pool", e))?;
        Ok(())
    }
}
