//! Cache-based real-time progress tracking for batch jobs.
//!
//! Complements the durable `BatchJob` counters with fast, ephemeral
//! progress that can be polled frequently without touching the database.
//! Counters use atomic hash increments so concurrent worker tasks never
//! lose updates.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};
use uuid::Uuid;

use opennotes_domain::constants::{BATCH_JOB_PROGRESS_KEY_PREFIX, BATCH_JOB_PROGRESS_TTL_SECS};
use opennotes_domain::entities::JobProgress;
use opennotes_domain::ports::CacheProvider;

/// Redis-hash-backed tracker for real-time batch job progress.
pub struct ProgressTracker {
    cache: Arc<dyn CacheProvider>,
}

fn now_unix() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl ProgressTracker {
    #[must_use]
    pub fn new(cache: Arc<dyn CacheProvider>) -> Self {
        Self { cache }
    }

    fn progress_key(job_id: Uuid) -> String {
        format!("{BATCH_JOB_PROGRESS_KEY_PREFIX}{job_id}")
    }

    /// Initialize tracking for a job. Returns whether the entry was written.
    pub async fn start_tracking(&self, job_id: Uuid, current_item: Option<&str>) -> bool {
        let key = Self::progress_key(job_id);
        let now = now_unix();

        let result: opennotes_domain::Result<()> = async {
            self.cache.hset(&key, "started_at", &now.to_string()).await?;
            self.cache.hset(&key, "last_update_at", &now.to_string()).await?;
            if let Some(item) = current_item {
                self.cache.hset(&key, "current_item", item).await?;
            }
            self.cache
                .expire(&key, Duration::from_secs(BATCH_JOB_PROGRESS_TTL_SECS))
                .await?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                debug!(job_id = %job_id, "Started progress tracking");
                true
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to start progress tracking");
                false
            }
        }
    }

    /// Record progress deltas. Increments are atomic (HINCRBY); absolute
    /// read-modify-write is deliberately not offered.
    pub async fn update_progress(
        &self,
        job_id: Uuid,
        processed_delta: i64,
        error_delta: i64,
        current_item: Option<&str>,
    ) -> Option<JobProgress> {
        let key = Self::progress_key(job_id);

        let result: opennotes_domain::Result<()> = async {
            if processed_delta != 0 {
                self.cache.hincrby(&key, "processed_count", processed_delta).await?;
            }
            if error_delta != 0 {
                self.cache.hincrby(&key, "error_count", error_delta).await?;
            }
            if let Some(item) = current_item {
                self.cache.hset(&key, "current_item", item).await?;
            }
            self.cache
                .hset(&key, "last_update_at", &now_unix().to_string())
                .await?;
            self.cache
                .expire(&key, Duration::from_secs(BATCH_JOB_PROGRESS_TTL_SECS))
                .await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!(job_id = %job_id, error = %e, "Failed to update progress");
            return None;
        }

        self.get_progress(job_id).await
    }

    /// Current progress, or `None` when untracked or the backend errors.
    pub async fn get_progress(&self, job_id: Uuid) -> Option<JobProgress> {
        let key = Self::progress_key(job_id);
        let fields = match self.cache.hgetall(&key).await {
            Ok(fields) if !fields.is_empty() => fields,
            Ok(_) => return None,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to read progress");
                return None;
            }
        };

        let mut progress = JobProgress::new(job_id, 0.0);
        for (field, value) in fields {
            match field.as_str() {
                "processed_count" => progress.processed_count = value.parse().unwrap_or(0),
                "error_count" => progress.error_count = value.parse().unwrap_or(0),
                "current_item" => progress.current_item = Some(value),
                "started_at" => progress.started_at = value.parse().unwrap_or(0.0),
                "last_update_at" => progress.last_update_at = value.parse().unwrap_or(0.0),
                _ => {}
            }
        }
        Some(progress)
    }

    /// Remove tracking for a finished job. Returns whether an entry existed.
    pub async fn stop_tracking(&self, job_id: Uuid) -> bool {
        let key = Self::progress_key(job_id);
        match self.cache.delete(&key).await {
            Ok(existed) => {
                if existed {
                    debug!(job_id = %job_id, "Stopped progress tracking");
                }
                existed
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to stop progress tracking");
                false
            }
        }
    }
}
