//! Rechunk jobs: regenerate chunks and links for all source entities of a
//! community, streaming in batches.
//!
//! The mutual-exclusion lock is acquired by the HTTP endpoint that creates
//! the job; the worker running this service only releases it. Cancellation
//! is polled between batches.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use opennotes_domain::constants::RECHUNK_LOCK_TTL_SECS;
use opennotes_domain::entities::{BatchJob, Chunk, ChunkLink, ChunkSourceKind};
use opennotes_domain::error::{Error, Result};
use opennotes_domain::ports::{
    ChunkRepository, FactCheckRepository, LockManager, PreviouslySeenRepository,
};

use super::batch_jobs::BatchJobService;
use super::chunking::SentenceWindowChunker;

/// Default number of source entities pulled per streaming block.
pub const DEFAULT_BATCH_SIZE: i64 = 50;

/// Worker-side execution of rechunk batch jobs.
pub struct RechunkService {
    jobs: Arc<BatchJobService>,
    chunks: Arc<dyn ChunkRepository>,
    fact_checks: Arc<dyn FactCheckRepository>,
    previously_seen: Arc<dyn PreviouslySeenRepository>,
    locks: Arc<dyn LockManager>,
    chunker: SentenceWindowChunker,
}

impl RechunkService {
    #[must_use]
    pub fn new(
        jobs: Arc<BatchJobService>,
        chunks: Arc<dyn ChunkRepository>,
        fact_checks: Arc<dyn FactCheckRepository>,
        previously_seen: Arc<dyn PreviouslySeenRepository>,
        locks: Arc<dyn LockManager>,
        chunker: SentenceWindowChunker,
    ) -> Self {
        Self {
            jobs,
            chunks,
            fact_checks,
            previously_seen,
            locks,
            chunker,
        }
    }

    /// Job type tag for a source kind, e.g. `rechunk:fact_check`.
    #[must_use]
    pub fn job_type(kind: ChunkSourceKind) -> String {
        format!("rechunk:{}", kind.as_str())
    }

    /// Create the guarded batch job for a rechunk run.
    ///
    /// The caller (HTTP endpoint) must already hold the rechunk lock; this
    /// only guards against a second active job record.
    pub async fn create_job(
        &self,
        kind: ChunkSourceKind,
        community_server_id: Uuid,
        batch_size: i64,
        dry_run: bool,
    ) -> Result<BatchJob> {
        let mut metadata = BTreeMap::new();
        metadata.insert("batch_size".to_owned(), serde_json::json!(batch_size));
        metadata.insert("dry_run".to_owned(), serde_json::json!(dry_run));
        metadata.insert(
            "community_server_id".to_owned(),
            serde_json::json!(community_server_id),
        );
        let total = match kind {
            ChunkSourceKind::FactCheck => self.fact_checks.count_items().await?,
            ChunkSourceKind::PreviouslySeen => 0,
        };
        self.jobs
            .create_job_guarded(
                &Self::job_type(kind),
                &community_server_id.to_string(),
                total,
                metadata,
            )
            .await
    }

    /// Execute a previously created rechunk job to completion.
    ///
    /// Releases the rechunk lock whatever the outcome. Exercised by the
    /// dispatched workflow step.
    pub async fn run_job(&self, job_id: Uuid, kind: ChunkSourceKind) -> Result<()> {
        // Resolve the community first: the lock must be released on every
        // exit path after this point.
        let job = self.jobs.get_job(job_id).await?;
        let community_server_id = job
            .metadata
            .get("community_server_id")
            .and_then(|v| v.as_str().map(ToOwned::to_owned))
            .and_then(|s| s.parse::<Uuid>().ok())
            .ok_or_else(|| Error::internal(format!("Job {job_id} has no community_server_id")))?;
        let batch_size = job
            .metadata
            .get("batch_size")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or(DEFAULT_BATCH_SIZE);

        if let Err(e) = self.jobs.start_job(job_id).await {
            let community = community_server_id.to_string();
            self.locks
                .release(kind.as_str(), Some(community.as_str()))
                .await;
            // Cancelled before the worker picked it up: nothing to do.
            if matches!(e, Error::Conflict { .. }) {
                info!(job_id = %job_id, "Rechunk job no longer startable");
                return Ok(());
            }
            return Err(e);
        }

        let outcome = self
            .process_all(job_id, kind, community_server_id, batch_size)
            .await;

        let community = community_server_id.to_string();
        self.locks
            .release(kind.as_str(), Some(community.as_str()))
            .await;

        match outcome {
            Ok(processed) => {
                self.jobs.complete_job(job_id).await?;
                info!(job_id = %job_id, processed, "Rechunk job completed");
                Ok(())
            }
            Err(Error::Conflict { message }) => {
                // Cancellation observed mid-run; the job row is already
                // terminal.
                info!(job_id = %job_id, message, "Rechunk job stopped");
                Ok(())
            }
            Err(e) => {
                self.jobs.fail_job(job_id, &e.to_string()).await?;
                Err(e)
            }
        }
    }

    async fn process_all(
        &self,
        job_id: Uuid,
        kind: ChunkSourceKind,
        community_server_id: Uuid,
        batch_size: i64,
    ) -> Result<u64> {
        let mut processed = 0u64;
        let mut after: Option<Uuid> = None;

        loop {
            if self.jobs.is_cancelled(job_id).await? {
                return Err(Error::conflict(format!("Job {job_id} was cancelled")));
            }

            let sources: Vec<(Uuid, String)> = match kind {
                ChunkSourceKind::FactCheck => self
                    .fact_checks
                    .list_items_after(after, batch_size)
                    .await?
                    .into_iter()
                    .map(|item| (item.id, item.content))
                    .collect(),
                ChunkSourceKind::PreviouslySeen => self
                    .previously_seen
                    .list_for_community_after(community_server_id, after, batch_size)
                    .await?
                    .into_iter()
                    .map(|m| {
                        let text = m
                            .extra_metadata
                            .as_ref()
                            .and_then(|v| v.get("content"))
                            .and_then(|v| v.as_str())
                            .unwrap_or_default()
                            .to_owned();
                        (m.id, text)
                    })
                    .collect(),
            };

            if sources.is_empty() {
                break;
            }
            after = sources.last().map(|(id, _)| *id);

            for (source_id, text) in sources {
                match self.chunk_source(kind, source_id, &text).await {
                    Ok(count) => {
                        processed += 1;
                        self.jobs
                            .update_progress(job_id, 1, 0, Some(&source_id.to_string()))
                            .await?;
                        if count == 0 {
                            warn!(source_id = %source_id, "Source produced no chunks");
                        }
                    }
                    Err(e) => {
                        warn!(source_id = %source_id, error = %e, "Failed to rechunk source");
                        self.jobs.update_progress(job_id, 0, 1, None).await?;
                    }
                }
            }
        }

        Ok(processed)
    }

    /// Steps 1-4 of the pipeline for one source entity. Returns the number
    /// of chunks linked.
    pub async fn chunk_source(
        &self,
        kind: ChunkSourceKind,
        source_id: Uuid,
        text: &str,
    ) -> Result<usize> {
        let pieces = self.chunker.chunk(text)?;
        for (index, piece) in pieces.iter().enumerate() {
            let stored = self.chunks.upsert_chunk(&Chunk::from_text(piece.clone())).await?;
            self.chunks
                .upsert_link(
                    kind,
                    &ChunkLink {
                        chunk_id: stored.id,
                        source_id,
                        chunk_index: index as i32,
                    },
                )
                .await?;
        }
        Ok(pieces.len())
    }

    /// TTL the endpoint should use when acquiring the rechunk lock.
    #[must_use]
    pub fn lock_ttl() -> std::time::Duration {
        std::time::Duration::from_secs(RECHUNK_LOCK_TTL_SECS)
    }
}
