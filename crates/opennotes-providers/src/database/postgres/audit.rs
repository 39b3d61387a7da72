//! Audit log repository.

use async_trait::async_trait;
use sqlx::postgres::PgPool;

use opennotes_domain::entities::AuditRecord;
use opennotes_domain::error::Result;
use opennotes_domain::ports::AuditRepository;

use super::db_err;

/// sqlx-backed audit log.
pub struct PgAuditRepository {
    pool: PgPool,
}

impl PgAuditRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditRepository for PgAuditRepository {
    async fn insert(&self, record: &AuditRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_log \
             (id, user_id, method, path, status_code, details, occurred_at, duration_ms) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.method)
        .bind(&record.path)
        .bind(i32::from(record.status_code))
        .bind(&record.details)
        .bind(record.occurred_at)
        .bind(record.duration_ms as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to insert audit record", e))?;
        Ok(())
    }
}
