//! Batch job entity and lifecycle state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Status of a batch job.
///
/// Transitions form a DAG: PENDING → IN_PROGRESS → {COMPLETED, FAILED,
/// CANCELLED}, plus PENDING → CANCELLED directly. Terminal states are
/// absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether this status admits no further transitions.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the declared transition DAG admits `self → next`.
    #[must_use]
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            Self::Pending => matches!(next, Self::InProgress | Self::Cancelled | Self::Failed),
            Self::InProgress => matches!(next, Self::Completed | Self::Failed | Self::Cancelled),
            Self::Completed | Self::Failed | Self::Cancelled => false,
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Unknown job status: {s}")),
        }
    }
}

/// Durable record of a unit of background work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: Uuid,
    /// Free-form type tag, e.g. `import:snopes` or `rechunk:fact_check`.
    pub job_type: String,
    pub status: JobStatus,
    /// May be 0 when the total is unknown up front.
    pub total_tasks: i64,
    pub completed_tasks: i64,
    pub failed_tasks: i64,
    pub metadata: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl BatchJob {
    /// Build a fresh PENDING job.
    #[must_use]
    pub fn new(job_type: impl Into<String>, total_tasks: i64, metadata: BTreeMap<String, Value>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            job_type: job_type.into(),
            status: JobStatus::Pending,
            total_tasks,
            completed_tasks: 0,
            failed_tasks: 0,
            metadata,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Validate a transition against the DAG.
    ///
    /// # Errors
    ///
    /// Returns `Error::Conflict` when the DAG forbids `self.status → next`.
    pub fn check_transition(&self, next: JobStatus) -> Result<()> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(Error::conflict(format!(
                "Job {} cannot transition from {} to {}",
                self.id,
                self.status.as_str(),
                next.as_str()
            )))
        }
    }
}

/// Ephemeral per-job counters kept in the cache layer.
///
/// Complements the durable `BatchJob` counters with fast, frequently polled
/// progress. Entries expire one hour after the last update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: Uuid,
    pub processed_count: i64,
    pub error_count: i64,
    pub current_item: Option<String>,
    /// Unix seconds.
    pub started_at: f64,
    /// Unix seconds.
    pub last_update_at: f64,
}

impl JobProgress {
    #[must_use]
    pub fn new(job_id: Uuid, now: f64) -> Self {
        Self {
            job_id,
            processed_count: 0,
            error_count: 0,
            current_item: None,
            started_at: now,
            last_update_at: now,
        }
    }

    /// Items per second since tracking started.
    #[must_use]
    pub fn rate(&self) -> f64 {
        let elapsed = self.last_update_at - self.started_at;
        if elapsed <= 0.0 {
            return 0.0;
        }
        self.processed_count as f64 / elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_can_start_or_cancel() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::InProgress));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Cancelled));
        assert!(!JobStatus::Pending.can_transition_to(JobStatus::Completed));
    }

    #[test]
    fn terminal_states_are_absorbing() {
        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            for next in [
                JobStatus::Pending,
                JobStatus::InProgress,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal:?} -> {next:?}");
            }
        }
    }

    #[test]
    fn cancelled_job_never_reenters_in_progress() {
        let mut job = BatchJob::new("rechunk:fact_check", 10, BTreeMap::new());
        job.status = JobStatus::Cancelled;
        assert!(job.check_transition(JobStatus::InProgress).is_err());
    }

    #[test]
    fn progress_rate_is_zero_before_first_update() {
        let p = JobProgress::new(Uuid::now_v7(), 100.0);
        assert_eq!(p.rate(), 0.0);
    }

    #[test]
    fn progress_rate_counts_items_per_second() {
        let mut p = JobProgress::new(Uuid::now_v7(), 100.0);
        p.processed_count = 30;
        p.last_update_at = 110.0;
        assert!((p.rate() - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [
            JobStatus::Pending,
            JobStatus::InProgress,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(s.as_str().parse::<JobStatus>(), Ok(s));
        }
    }
}
