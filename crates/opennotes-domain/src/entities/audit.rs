//! Audit record emitted for state-changing requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One audit event. Persisted asynchronously; emission failures are counted
/// in metrics and never surfaced to the request that produced the record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    /// Truncated request body; see the audit service for truncation rules.
    pub details: Value,
    pub occurred_at: DateTime<Utc>,
    pub duration_ms: u64,
}
