//! Batch job engine behavior.

use std::collections::BTreeMap;
use std::sync::Arc;

use opennotes_application::services::{BatchJobService, ProgressTracker};
use opennotes_domain::entities::JobStatus;
use opennotes_domain::error::Error;

use crate::fakes::{InMemoryCache, InMemoryJobs};

fn service() -> (Arc<BatchJobService>, Arc<InMemoryJobs>, Arc<InMemoryCache>) {
    let repo = Arc::new(InMemoryJobs::new());
    let cache = Arc::new(InMemoryCache::new());
    let tracker = Arc::new(ProgressTracker::new(cache.clone()));
    (
        Arc::new(BatchJobService::new(repo.clone(), tracker)),
        repo,
        cache,
    )
}

#[tokio::test]
async fn job_lifecycle_happy_path() {
    let (service, _, _) = service();
    let job = service
        .create_job("import:snopes", 10, BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Pending);

    let job = service.start_job(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::InProgress);
    assert!(job.started_at.is_some());

    service.update_progress(job.id, 10, 0, None).await.unwrap();
    let job = service.complete_job(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert!(job.completed_at.is_some());
    assert_eq!(job.completed_tasks, 10);
}

#[tokio::test]
async fn concurrent_progress_updates_all_count() {
    let (service, _, _) = service();
    let job = service.create_job("import:x", 100, BTreeMap::new()).await.unwrap();
    service.start_job(job.id).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..50 {
        let service = Arc::clone(&service);
        let id = job.id;
        handles.push(tokio::spawn(async move {
            service.update_progress(id, 1, 0, None).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    // Durable counters and cache counters both saw every increment.
    let job = service.get_job(job.id).await.unwrap();
    assert_eq!(job.completed_tasks, 50);
    let progress = service.get_progress(job.id).await.unwrap();
    assert_eq!(progress.processed_count, 50);
}

#[tokio::test]
async fn guarded_creation_admits_exactly_one_under_contention() {
    let (service, _, _) = service();
    let mut handles = Vec::new();
    for _ in 0..5 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move {
            service
                .create_job_guarded("rechunk:fact_check", "community-1", 150, BTreeMap::new())
                .await
        }));
    }

    let mut created = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => created += 1,
            Err(Error::ActiveJobExists { .. }) => conflicts += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(conflicts, 4);
}

#[tokio::test]
async fn guarded_creation_fails_while_a_job_is_active() {
    let (service, _, _) = service();
    let first = service
        .create_job_guarded("rechunk:fact_check", "community-1", 0, BTreeMap::new())
        .await
        .unwrap();

    let err = service
        .create_job_guarded("rechunk:fact_check", "community-1", 0, BTreeMap::new())
        .await
        .unwrap_err();
    match err {
        Error::ActiveJobExists { job_id } => assert_eq!(job_id, first.id),
        other => panic!("unexpected error: {other}"),
    }

    // A different community is unaffected.
    service
        .create_job_guarded("rechunk:fact_check", "community-2", 0, BTreeMap::new())
        .await
        .unwrap();

    // Completing the job frees the slot.
    service.start_job(first.id).await.unwrap();
    service.complete_job(first.id).await.unwrap();
    service
        .create_job_guarded("rechunk:fact_check", "community-1", 0, BTreeMap::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn cancel_is_only_valid_from_non_terminal_states() {
    let (service, _, _) = service();
    let job = service.create_job("import:x", 0, BTreeMap::new()).await.unwrap();
    let job = service.cancel_job(job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);

    // Cancelling again is a conflict: terminal states are absorbing.
    assert!(matches!(
        service.cancel_job(job.id).await,
        Err(Error::Conflict { .. })
    ));

    // And a cancelled job never re-enters IN_PROGRESS.
    assert!(service.start_job(job.id).await.is_err());
    assert!(service.is_cancelled(job.id).await.unwrap());
}

#[tokio::test]
async fn stale_sweep_fails_old_jobs_and_leaves_fresh_ones() {
    let (service, repo, _) = service();
    let stale = service.create_job("import:old", 0, BTreeMap::new()).await.unwrap();
    service.start_job(stale.id).await.unwrap();
    let fresh = service.create_job("import:new", 0, BTreeMap::new()).await.unwrap();

    // Age the stale job past the threshold.
    {
        let mut jobs = repo.jobs.lock().unwrap();
        let job = jobs.get_mut(&stale.id).unwrap();
        job.updated_at = chrono::Utc::now() - chrono::Duration::hours(30);
    }

    let failed = service.cleanup_stale_jobs(24).await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, stale.id);
    assert_eq!(failed[0].status, JobStatus::Failed);
    assert!(failed[0].completed_at.is_some());
    let error = failed[0].metadata.get("error").unwrap().as_str().unwrap();
    assert!(error.contains("stale"));

    assert_eq!(
        service.get_job(fresh.id).await.unwrap().status,
        JobStatus::Pending
    );
}

#[tokio::test]
async fn stuck_monitor_reports_without_modifying() {
    let (service, repo, _) = service();
    let job = service.create_job("import:x", 0, BTreeMap::new()).await.unwrap();
    service.start_job(job.id).await.unwrap();
    {
        let mut jobs = repo.jobs.lock().unwrap();
        jobs.get_mut(&job.id).unwrap().updated_at =
            chrono::Utc::now() - chrono::Duration::minutes(90);
    }

    let stuck = service.find_stuck_jobs(60).await.unwrap();
    assert_eq!(stuck.len(), 1);
    // Monitor is read-only.
    assert_eq!(
        service.get_job(job.id).await.unwrap().status,
        JobStatus::InProgress
    );
}

#[tokio::test]
async fn progress_prefers_cache_then_falls_back_to_durable_counters() {
    let (service, _, cache) = service();
    let job = service.create_job("import:x", 10, BTreeMap::new()).await.unwrap();
    service.start_job(job.id).await.unwrap();
    service.update_progress(job.id, 3, 1, Some("row-4")).await.unwrap();

    let progress = service.get_progress(job.id).await.unwrap();
    assert_eq!(progress.processed_count, 3);
    assert_eq!(progress.error_count, 1);
    assert_eq!(progress.current_item.as_deref(), Some("row-4"));

    // Drop the cache entry: durable counters still answer.
    cache
        .hashes
        .lock()
        .unwrap()
        .clear();
    let progress = service.get_progress(job.id).await.unwrap();
    assert_eq!(progress.processed_count, 3);
    assert_eq!(progress.error_count, 1);
}
