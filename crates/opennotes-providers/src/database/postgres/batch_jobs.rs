//! Batch job repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::collections::BTreeMap;
use uuid::Uuid;

use opennotes_domain::entities::{BatchJob, JobStatus};
use opennotes_domain::error::{Error, Result};
use opennotes_domain::ports::BatchJobRepository;

use super::db_err;

/// sqlx-backed batch job storage.
pub struct PgBatchJobRepository {
    pool: PgPool,
}

impl PgBatchJobRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<BatchJob> {
        let status: String = row.try_get("status").map_err(|e| db_err("read status", e))?;
        let metadata: Value = row
            .try_get("metadata")
            .map_err(|e| db_err("read metadata", e))?;
        let metadata: BTreeMap<String, Value> = match metadata {
            Value::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        Ok(BatchJob {
            id: row.try_get("id").map_err(|e| db_err("read id", e))?,
            job_type: row.try_get("job_type").map_err(|e| db_err("read job_type", e))?,
            status: status
                .parse()
                .map_err(|e: String| Error::internal(format!("Corrupt job status: {e}")))?,
            total_tasks: row.try_get("total_tasks").map_err(|e| db_err("read total_tasks", e))?,
            completed_tasks: row
                .try_get("completed_tasks")
                .map_err(|e| db_err("read completed_tasks", e))?,
            failed_tasks: row
                .try_get("failed_tasks")
                .map_err(|e| db_err("read failed_tasks", e))?,
            metadata,
            created_at: row.try_get("created_at").map_err(|e| db_err("read created_at", e))?,
            started_at: row.try_get("started_at").map_err(|e| db_err("read started_at", e))?,
            completed_at: row
                .try_get("completed_at")
                .map_err(|e| db_err("read completed_at", e))?,
            updated_at: row.try_get("updated_at").map_err(|e| db_err("read updated_at", e))?,
        })
    }
}

const SELECT_COLUMNS: &str = "id, job_type, status, total_tasks, completed_tasks, failed_tasks, \
                              metadata, created_at, started_at, completed_at, updated_at";

#[async_trait]
impl BatchJobRepository for PgBatchJobRepository {
    async fn insert(&self, job: &BatchJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO batch_jobs \
             (id, job_type, status, total_tasks, completed_tasks, failed_tasks, metadata, \
              created_at, started_at, completed_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(job.id)
        .bind(&job.job_type)
        .bind(job.status.as_str())
        .bind(job.total_tasks)
        .bind(job.completed_tasks)
        .bind(job.failed_tasks)
        .bind(Value::Object(job.metadata.clone().into_iter().collect()))
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to insert batch job", e))?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<BatchJob>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM batch_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to load batch job", e))?;
        row.as_ref().map(Self::row_to_job).transpose()
    }

    async fn list(
        &self,
        job_type: Option<&str>,
        status: Option<JobStatus>,
        limit: i64,
    ) -> Result<Vec<BatchJob>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM batch_jobs \
             WHERE ($1::text IS NULL OR job_type = $1) \
               AND ($2::text IS NULL OR status = $2) \
             ORDER BY created_at DESC LIMIT $3"
        ))
        .bind(job_type)
        .bind(status.map(|s| s.as_str()))
        .bind(limit.clamp(1, 500))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to list batch jobs", e))?;
        rows.iter().map(Self::row_to_job).collect()
    }

    async fn transition(
        &self,
        id: Uuid,
        next: JobStatus,
        error: Option<String>,
    ) -> Result<BatchJob> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err("Failed to begin transaction", e))?;

        // Row lock serializes status transitions per job.
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM batch_jobs WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_err("Failed to lock batch job", e))?
        .ok_or_else(|| Error::not_found(format!("batch job {id}")))?;
        let current = Self::row_to_job(&row)?;
        current.check_transition(next)?;

        let now = Utc::now();
        let started_at = match (next, current.started_at) {
            (JobStatus::InProgress, None) => Some(now),
            (_, existing) => existing,
        };
        let completed_at = if next.is_terminal() { Some(now) } else { None };
        let error_patch = error
            .map(|message| serde_json::json!({ "error": message }))
            .unwrap_or_else(|| serde_json::json!({}));

        let row = sqlx::query(&format!(
            "UPDATE batch_jobs \
             SET status = $2, started_at = $3, completed_at = COALESCE($4, completed_at), \
                 metadata = metadata || $5, updated_at = $6 \
             WHERE id = $1 RETURNING {SELECT_COLUMNS}"
        ))
        .bind(id)
        .bind(next.as_str())
        .bind(started_at)
        .bind(completed_at)
        .bind(error_patch)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_err("Failed to update batch job", e))?;

        tx.commit()
            .await
            .map_err(|e| db_err("Failed to commit transition", e))?;
        Self::row_to_job(&row)
    }

    async fn increment_progress(
        &self,
        id: Uuid,
        completed_delta: i64,
        failed_delta: i64,
    ) -> Result<()> {
        // Atomic SQL increments; read-modify-write would lose updates.
        let result = sqlx::query(
            "UPDATE batch_jobs \
             SET completed_tasks = completed_tasks + $2, \
                 failed_tasks = failed_tasks + $3, \
                 updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(completed_delta)
        .bind(failed_delta)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to increment progress", e))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("batch job {id}")));
        }
        Ok(())
    }

    async fn merge_metadata(&self, id: Uuid, patch: BTreeMap<String, Value>) -> Result<()> {
        sqlx::query(
            "UPDATE batch_jobs SET metadata = metadata || $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(Value::Object(patch.into_iter().collect()))
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to merge job metadata", e))?;
        Ok(())
    }

    async fn insert_guarded(
        &self,
        job: &BatchJob,
        guard_job_type: &str,
        guard_resource_id: &str,
    ) -> Result<()> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_err("Failed to begin transaction", e))?;

        // Ensure the sentinel exists, then take its row lock. Every
        // concurrent creator for this (job_type, resource) serializes here,
        // closing the check-then-insert race.
        sqlx::query(
            "INSERT INTO batch_job_guards (job_type, resource_id) VALUES ($1, $2) \
             ON CONFLICT DO NOTHING",
        )
        .bind(guard_job_type)
        .bind(guard_resource_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_err("Failed to ensure job guard", e))?;

        sqlx::query("SELECT 1 FROM batch_job_guards WHERE job_type = $1 AND resource_id = $2 FOR UPDATE")
            .bind(guard_job_type)
            .bind(guard_resource_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| db_err("Failed to lock job guard", e))?;

        let active: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM batch_jobs \
             WHERE job_type = $1 \
               AND status IN ('pending', 'in_progress') \
               AND metadata->>'resource_id' = $2 \
             LIMIT 1",
        )
        .bind(guard_job_type)
        .bind(guard_resource_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_err("Failed to check for active job", e))?;

        if let Some(job_id) = active {
            return Err(Error::ActiveJobExists { job_id });
        }

        // The guard key is stamped into the metadata so the active check
        // above finds this row on the next attempt.
        let mut metadata: serde_json::Map<String, Value> =
            job.metadata.clone().into_iter().collect();
        metadata.insert(
            "resource_id".to_owned(),
            Value::String(guard_resource_id.to_owned()),
        );

        sqlx::query(
            "INSERT INTO batch_jobs \
             (id, job_type, status, total_tasks, completed_tasks, failed_tasks, metadata, \
              created_at, started_at, completed_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(job.id)
        .bind(&job.job_type)
        .bind(job.status.as_str())
        .bind(job.total_tasks)
        .bind(job.completed_tasks)
        .bind(job.failed_tasks)
        .bind(Value::Object(metadata))
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_err("Failed to insert guarded batch job", e))?;

        tx.commit()
            .await
            .map_err(|e| db_err("Failed to commit guarded insert", e))?;
        Ok(())
    }

    async fn find_untouched_since(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[JobStatus],
    ) -> Result<Vec<BatchJob>> {
        let status_strings: Vec<String> =
            statuses.iter().map(|s| s.as_str().to_owned()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM batch_jobs \
             WHERE status = ANY($1) AND updated_at < $2 \
             ORDER BY updated_at ASC"
        ))
        .bind(&status_strings)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to find untouched jobs", e))?;
        rows.iter().map(Self::row_to_job).collect()
    }
}
