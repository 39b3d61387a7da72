//! Cron scheduler for maintenance workflows.
//!
//! First-class scheduler: jobs are registered at startup with a cron
//! expression and an async callback; each firing is an independent,
//! idempotent execution. The stock registrations cover the stale job
//! sweep, the stuck job monitor, and the token hold reclaimer.

use chrono::Utc;
use cron::Schedule;
use futures::future::BoxFuture;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use opennotes_application::services::BatchJobService;
use opennotes_domain::error::{Error, Result};
use opennotes_domain::ports::TokenBucketRepository;

use crate::config::SchedulerConfig;

/// Async job callback.
pub type ScheduledJobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static>;

struct ScheduledJob {
    name: String,
    schedule: Schedule,
    run: ScheduledJobFn,
}

/// Cron-driven job runner.
#[derive(Default)]
pub struct Scheduler {
    jobs: Vec<ScheduledJob>,
}

impl Scheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job.
    ///
    /// # Errors
    ///
    /// `Error::ConfigInvalid` on a malformed cron expression.
    pub fn register(&mut self, name: &str, cron_expr: &str, run: ScheduledJobFn) -> Result<()> {
        let schedule = Schedule::from_str(cron_expr).map_err(|e| Error::ConfigInvalid {
            key: format!("scheduler.{name}"),
            message: format!("Invalid cron expression '{cron_expr}': {e}"),
        })?;
        self.jobs.push(ScheduledJob {
            name: name.to_owned(),
            schedule,
            run,
        });
        Ok(())
    }

    /// Spawn one driver task per registered job. Tasks run until the token
    /// is cancelled.
    #[must_use]
    pub fn start(self, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        self.jobs
            .into_iter()
            .map(|job| {
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    info!(job = job.name, "Scheduled job registered");
                    loop {
                        let Some(next) = job.schedule.upcoming(Utc).next() else {
                            warn!(job = job.name, "Schedule yields no future firings, stopping");
                            return;
                        };
                        let wait = (next - Utc::now())
                            .to_std()
                            .unwrap_or(std::time::Duration::ZERO);
                        tokio::select! {
                            () = shutdown.cancelled() => {
                                info!(job = job.name, "Scheduler stopping");
                                return;
                            }
                            () = tokio::time::sleep(wait) => {
                                info!(job = job.name, "Running scheduled job");
                                (job.run)().await;
                            }
                        }
                    }
                })
            })
            .collect()
    }
}

/// Register the standard maintenance jobs.
///
/// # Errors
///
/// Propagates cron parse failures from the configuration.
pub fn register_maintenance_jobs(
    scheduler: &mut Scheduler,
    config: &SchedulerConfig,
    jobs: Arc<BatchJobService>,
    token_bucket: Arc<dyn TokenBucketRepository>,
) -> Result<()> {
    let stale_threshold = config.stale_threshold_hours;
    let sweep_jobs = Arc::clone(&jobs);
    scheduler.register(
        "cleanup_stale_batch_jobs",
        &config.stale_sweep_cron,
        Arc::new(move || {
            let jobs = Arc::clone(&sweep_jobs);
            Box::pin(async move {
                match jobs.cleanup_stale_jobs(stale_threshold).await {
                    Ok(failed) => {
                        if !failed.is_empty() {
                            info!(
                                cleaned_count = failed.len(),
                                "Scheduled cleanup marked stale jobs as failed"
                            );
                        }
                    }
                    Err(e) => error!(error = %e, "Stale job cleanup failed"),
                }
            })
        }),
    )?;

    let stuck_threshold = config.stuck_threshold_minutes;
    let monitor_jobs = Arc::clone(&jobs);
    scheduler.register(
        "monitor_stuck_batch_jobs",
        &config.stuck_monitor_cron,
        Arc::new(move || {
            let jobs = Arc::clone(&monitor_jobs);
            Box::pin(async move {
                match jobs.find_stuck_jobs(stuck_threshold).await {
                    Ok(stuck) if stuck.is_empty() => {}
                    Ok(stuck) => {
                        // Warn-only: the monitor never mutates jobs.
                        warn!(
                            stuck_count = stuck.len(),
                            threshold_minutes = stuck_threshold,
                            job_ids = ?stuck.iter().map(|j| j.id).collect::<Vec<_>>(),
                            "Found stuck batch jobs"
                        );
                    }
                    Err(e) => error!(error = %e, "Stuck job monitor failed"),
                }
            })
        }),
    )?;

    let reclaim_after = config.token_reclaim_after_minutes;
    scheduler.register(
        "reclaim_token_holds",
        &config.token_reclaim_cron,
        Arc::new(move || {
            let token_bucket = Arc::clone(&token_bucket);
            Box::pin(async move {
                let cutoff = Utc::now() - chrono::Duration::minutes(reclaim_after);
                match token_bucket.reclaim_expired(cutoff).await {
                    Ok(0) => {}
                    Ok(count) => info!(reclaimed = count, "Reclaimed orphaned token holds"),
                    Err(e) => error!(error = %e, "Token hold reclaim failed"),
                }
            })
        }),
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn rejects_invalid_cron() {
        let mut scheduler = Scheduler::new();
        let result = scheduler.register("bad", "not a cron", Arc::new(|| Box::pin(async {})));
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn fires_on_schedule() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut scheduler = Scheduler::new();
        let counter = Arc::clone(&fired);
        scheduler
            .register(
                "every_second",
                "* * * * * *",
                Arc::new(move || {
                    let counter = Arc::clone(&counter);
                    Box::pin(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            )
            .unwrap();

        let shutdown = CancellationToken::new();
        let handles = scheduler.start(shutdown.clone());

        tokio::time::sleep(std::time::Duration::from_millis(3500)).await;
        shutdown.cancel();
        for handle in handles {
            let _ = handle.await;
        }
        assert!(fired.load(Ordering::SeqCst) >= 2);
    }
}
