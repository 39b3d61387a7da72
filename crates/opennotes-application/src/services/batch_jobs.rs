//! Batch job lifecycle engine.

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use opennotes_domain::entities::{BatchJob, JobProgress, JobStatus};
use opennotes_domain::error::{Error, Result};
use opennotes_domain::ports::BatchJobRepository;

use super::progress::ProgressTracker;

/// Lifecycle operations over durable batch jobs, with cache-side progress.
pub struct BatchJobService {
    repo: Arc<dyn BatchJobRepository>,
    tracker: Arc<ProgressTracker>,
}

impl BatchJobService {
    #[must_use]
    pub fn new(repo: Arc<dyn BatchJobRepository>, tracker: Arc<ProgressTracker>) -> Self {
        Self { repo, tracker }
    }

    /// Create a PENDING job.
    pub async fn create_job(
        &self,
        job_type: &str,
        total_tasks: i64,
        metadata: BTreeMap<String, Value>,
    ) -> Result<BatchJob> {
        let job = BatchJob::new(job_type, total_tasks, metadata);
        self.repo.insert(&job).await?;
        info!(job_id = %job.id, job_type, "Created batch job");
        Ok(job)
    }

    /// Create a PENDING job for a job type that admits only one active
    /// instance per resource.
    ///
    /// # Errors
    ///
    /// `Error::ActiveJobExists` (carrying the conflicting id) when an
    /// active job already exists for (job_type, resource_id).
    pub async fn create_job_guarded(
        &self,
        job_type: &str,
        resource_id: &str,
        total_tasks: i64,
        metadata: BTreeMap<String, Value>,
    ) -> Result<BatchJob> {
        let job = BatchJob::new(job_type, total_tasks, metadata);
        self.repo.insert_guarded(&job, job_type, resource_id).await?;
        info!(job_id = %job.id, job_type, resource_id, "Created guarded batch job");
        Ok(job)
    }

    pub async fn get_job(&self, id: Uuid) -> Result<BatchJob> {
        self.repo
            .get(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("batch job {id}")))
    }

    pub async fn list_jobs(
        &self,
        job_type: Option<&str>,
        status: Option<JobStatus>,
        limit: i64,
    ) -> Result<Vec<BatchJob>> {
        self.repo.list(job_type, status, limit).await
    }

    /// PENDING → IN_PROGRESS; stamps `started_at` and starts cache tracking.
    pub async fn start_job(&self, id: Uuid) -> Result<BatchJob> {
        let job = self.repo.transition(id, JobStatus::InProgress, None).await?;
        self.tracker.start_tracking(id, None).await;
        Ok(job)
    }

    /// Increment the durable counters and mirror into the cache entry.
    pub async fn update_progress(
        &self,
        id: Uuid,
        completed_delta: i64,
        failed_delta: i64,
        current_item: Option<&str>,
    ) -> Result<()> {
        self.repo
            .increment_progress(id, completed_delta, failed_delta)
            .await?;
        self.tracker
            .update_progress(id, completed_delta, failed_delta, current_item)
            .await;
        Ok(())
    }

    /// Transition to COMPLETED and drop the cache entry.
    pub async fn complete_job(&self, id: Uuid) -> Result<BatchJob> {
        let job = self.repo.transition(id, JobStatus::Completed, None).await?;
        self.tracker.stop_tracking(id).await;
        Ok(job)
    }

    /// Transition to FAILED recording the error.
    pub async fn fail_job(&self, id: Uuid, error: &str) -> Result<BatchJob> {
        let job = self
            .repo
            .transition(id, JobStatus::Failed, Some(error.to_owned()))
            .await?;
        self.tracker.stop_tracking(id).await;
        Ok(job)
    }

    /// Cancel a job. Valid only from PENDING or IN_PROGRESS.
    ///
    /// Workers poll job status between steps and exit cleanly after a
    /// cancellation; a cancelled job never re-enters IN_PROGRESS.
    pub async fn cancel_job(&self, id: Uuid) -> Result<BatchJob> {
        let current = self.get_job(id).await?;
        if current.status.is_terminal() {
            return Err(Error::conflict(format!(
                "Job {id} is already {}",
                current.status.as_str()
            )));
        }
        let job = self.repo.transition(id, JobStatus::Cancelled, None).await?;
        self.tracker.stop_tracking(id).await;
        info!(job_id = %id, "Cancelled batch job");
        Ok(job)
    }

    /// True when the job has been cancelled; workers call this at safe
    /// points between steps.
    pub async fn is_cancelled(&self, id: Uuid) -> Result<bool> {
        Ok(self.get_job(id).await?.status == JobStatus::Cancelled)
    }

    /// Real-time progress, preferring the cache entry and falling back to
    /// the durable counters.
    pub async fn get_progress(&self, id: Uuid) -> Result<JobProgress> {
        if let Some(progress) = self.tracker.get_progress(id).await {
            return Ok(progress);
        }
        let job = self.get_job(id).await?;
        let mut progress = JobProgress::new(id, job.created_at.timestamp() as f64);
        progress.processed_count = job.completed_tasks;
        progress.error_count = job.failed_tasks;
        progress.last_update_at = job.updated_at.timestamp() as f64;
        Ok(progress)
    }

    /// Sweep non-terminal jobs untouched for longer than
    /// `stale_threshold_hours` to FAILED with a synthetic error.
    pub async fn cleanup_stale_jobs(&self, stale_threshold_hours: i64) -> Result<Vec<BatchJob>> {
        let cutoff = Utc::now() - ChronoDuration::hours(stale_threshold_hours);
        let stale = self
            .repo
            .find_untouched_since(cutoff, &[JobStatus::Pending, JobStatus::InProgress])
            .await?;

        let mut failed = Vec::with_capacity(stale.len());
        for job in stale {
            let error = format!(
                "Job marked as stale: no update for more than {stale_threshold_hours}h"
            );
            match self.repo.transition(job.id, JobStatus::Failed, Some(error)).await {
                Ok(job) => failed.push(job),
                // Lost the race against a worker finishing the job; fine.
                Err(Error::Conflict { .. }) => {}
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Failed to sweep stale job");
                }
            }
        }

        if failed.is_empty() {
            info!(threshold_hours = stale_threshold_hours, "Stale sweep found no stale jobs");
        } else {
            info!(
                cleaned_count = failed.len(),
                threshold_hours = stale_threshold_hours,
                "Stale sweep marked jobs as failed"
            );
        }
        Ok(failed)
    }

    /// Report non-terminal jobs untouched for longer than
    /// `threshold_minutes`, without modifying them.
    pub async fn find_stuck_jobs(&self, threshold_minutes: i64) -> Result<Vec<BatchJob>> {
        let cutoff = Utc::now() - ChronoDuration::minutes(threshold_minutes);
        self.repo
            .find_untouched_since(cutoff, &[JobStatus::Pending, JobStatus::InProgress])
            .await
    }
}
