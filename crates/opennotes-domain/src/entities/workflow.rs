//! Workflow execution entity owned by the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Status of a durable workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Enqueued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enqueued => "enqueued",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl std::str::FromStr for WorkflowStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "enqueued" => Ok(Self::Enqueued),
            "running" => Ok(Self::Running),
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown workflow status: {s}")),
        }
    }
}

/// Durable record of a workflow execution.
///
/// `step_state` maps step id → persisted result, which is what makes steps
/// re-entrant across worker crashes: a completed step's stored result is
/// returned instead of re-running the step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub workflow_id: String,
    pub workflow_name: String,
    pub queue_name: String,
    /// Prevents duplicate enqueue of the same logical workflow.
    pub deduplication_id: Option<String>,
    pub status: WorkflowStatus,
    pub step_state: BTreeMap<String, Value>,
    pub input: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
