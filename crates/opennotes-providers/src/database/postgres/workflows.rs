//! Workflow execution repository.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::Row;
use sqlx::postgres::PgPool;
use std::collections::BTreeMap;

use opennotes_domain::entities::{WorkflowExecution, WorkflowStatus};
use opennotes_domain::error::{Error, Result};
use opennotes_domain::ports::WorkflowRepository;

use super::db_err;

/// sqlx-backed workflow execution storage.
pub struct PgWorkflowRepository {
    pool: PgPool,
}

impl PgWorkflowRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_execution(row: &sqlx::postgres::PgRow) -> Result<WorkflowExecution> {
        let status: String = row.try_get("status").map_err(|e| db_err("read status", e))?;
        let step_state: Value = row
            .try_get("step_state")
            .map_err(|e| db_err("read step_state", e))?;
        let step_state: BTreeMap<String, Value> = match step_state {
            Value::Object(map) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        };
        Ok(WorkflowExecution {
            workflow_id: row
                .try_get("workflow_id")
                .map_err(|e| db_err("read workflow_id", e))?,
            workflow_name: row
                .try_get("workflow_name")
                .map_err(|e| db_err("read workflow_name", e))?,
            queue_name: row.try_get("queue_name").map_err(|e| db_err("read queue_name", e))?,
            deduplication_id: row
                .try_get("deduplication_id")
                .map_err(|e| db_err("read deduplication_id", e))?,
            status: status
                .parse()
                .map_err(|e: String| Error::internal(format!("Corrupt workflow status: {e}")))?,
            step_state,
            input: row.try_get("input").map_err(|e| db_err("read input", e))?,
            error: row.try_get("error").map_err(|e| db_err("read error", e))?,
            created_at: row.try_get("created_at").map_err(|e| db_err("read created_at", e))?,
            updated_at: row.try_get("updated_at").map_err(|e| db_err("read updated_at", e))?,
        })
    }
}

const COLUMNS: &str = "workflow_id, workflow_name, queue_name, deduplication_id, status, \
                       step_state, input, error, created_at, updated_at";

#[async_trait]
impl WorkflowRepository for PgWorkflowRepository {
    async fn insert_deduplicated(&self, execution: &WorkflowExecution) -> Result<String> {
        let inserted = sqlx::query(
            "INSERT INTO workflow_executions \
             (workflow_id, workflow_name, queue_name, deduplication_id, status, step_state, \
              input, error, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             ON CONFLICT (deduplication_id) WHERE deduplication_id IS NOT NULL DO NOTHING",
        )
        .bind(&execution.workflow_id)
        .bind(&execution.workflow_name)
        .bind(&execution.queue_name)
        .bind(&execution.deduplication_id)
        .bind(execution.status.as_str())
        .bind(Value::Object(execution.step_state.clone().into_iter().collect()))
        .bind(&execution.input)
        .bind(&execution.error)
        .bind(execution.created_at)
        .bind(execution.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to insert workflow execution", e))?;

        if inserted.rows_affected() > 0 {
            return Ok(execution.workflow_id.clone());
        }

        // Deduplicated: hand back the owning execution's id.
        let owner: String = sqlx::query_scalar(
            "SELECT workflow_id FROM workflow_executions WHERE deduplication_id = $1",
        )
        .bind(&execution.deduplication_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_err("Failed to resolve deduplicated workflow", e))?;
        Ok(owner)
    }

    async fn get(&self, workflow_id: &str) -> Result<Option<WorkflowExecution>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM workflow_executions WHERE workflow_id = $1"
        ))
        .bind(workflow_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to load workflow execution", e))?;
        row.as_ref().map(Self::row_to_execution).transpose()
    }

    async fn set_status(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        error: Option<String>,
    ) -> Result<()> {
        // Terminal executions free their deduplication id so the same
        // logical workflow can be enqueued again later; dedup only guards
        // against concurrent duplicates.
        let result = sqlx::query(
            "UPDATE workflow_executions \
             SET status = $2, error = COALESCE($3, error), updated_at = NOW(), \
                 deduplication_id = CASE \
                     WHEN $2 IN ('succeeded', 'failed', 'cancelled') THEN NULL \
                     ELSE deduplication_id END \
             WHERE workflow_id = $1",
        )
        .bind(workflow_id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to update workflow status", e))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("workflow {workflow_id}")));
        }
        Ok(())
    }

    async fn save_step_result(&self, workflow_id: &str, step_id: &str, result: Value) -> Result<()> {
        sqlx::query(
            "UPDATE workflow_executions \
             SET step_state = jsonb_set(step_state, ARRAY[$2], $3, true), updated_at = NOW() \
             WHERE workflow_id = $1",
        )
        .bind(workflow_id)
        .bind(step_id)
        .bind(result)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to persist step result", e))?;
        Ok(())
    }

    async fn find_resumable(&self, queue_name: &str, limit: i64) -> Result<Vec<WorkflowExecution>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM workflow_executions \
             WHERE queue_name = $1 AND status IN ('enqueued', 'running') \
             ORDER BY created_at ASC LIMIT $2"
        ))
        .bind(queue_name)
        .bind(limit.clamp(1, 500))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to find resumable workflows", e))?;
        rows.iter().map(Self::row_to_execution).collect()
    }
}
