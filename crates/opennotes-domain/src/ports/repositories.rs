//! Repository ports over the primary database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::entities::{
    AuditRecord, BatchJob, Chunk, ChunkLink, ChunkSourceKind, CommunityServer, FactCheckCandidate,
    FactCheckItem, JobStatus, Note, PoolStatus, PreviouslySeenMessage, Rating, WorkflowExecution,
    WorkflowStatus,
};
use crate::error::Result;

/// Durable batch job storage.
///
/// Status transitions within a single job are serialized by row-level locks
/// on the job row; counter updates are atomic increments in SQL, never
/// read-modify-write.
#[async_trait]
pub trait BatchJobRepository: Send + Sync {
    async fn insert(&self, job: &BatchJob) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<BatchJob>>;

    async fn list(
        &self,
        job_type: Option<&str>,
        status: Option<JobStatus>,
        limit: i64,
    ) -> Result<Vec<BatchJob>>;

    /// Transition a job's status under a row lock, validating the DAG.
    ///
    /// Returns the updated job. `error` lands in `metadata.error` for
    /// FAILED transitions.
    async fn transition(
        &self,
        id: Uuid,
        next: JobStatus,
        error: Option<String>,
    ) -> Result<BatchJob>;

    /// Atomically increment the durable counters.
    async fn increment_progress(
        &self,
        id: Uuid,
        completed_delta: i64,
        failed_delta: i64,
    ) -> Result<()>;

    /// Merge keys into the job metadata.
    async fn merge_metadata(&self, id: Uuid, patch: BTreeMap<String, Value>) -> Result<()>;

    /// Insert a job for a single-active-instance job type.
    ///
    /// TOCTOU-safe concurrent-creation guard: takes a SELECT ... FOR UPDATE
    /// row lock on a sentinel keyed by (job_type, resource_id), checks for
    /// an existing active job, and inserts inside the same transaction.
    /// Under N concurrent attempts exactly one succeeds when no active job
    /// exists; all fail with `Error::ActiveJobExists` when one does.
    async fn insert_guarded(
        &self,
        job: &BatchJob,
        guard_job_type: &str,
        guard_resource_id: &str,
    ) -> Result<()>;

    /// Jobs in a non-terminal status untouched since `cutoff`.
    async fn find_untouched_since(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[JobStatus],
    ) -> Result<Vec<BatchJob>>;
}

/// Chunk and chunk-link storage plus the two search legs.
#[async_trait]
pub trait ChunkRepository: Send + Sync {
    /// Upsert a chunk keyed by `chunk_text_hash`; returns the stored chunk
    /// (the existing row on hash conflict).
    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<Chunk>;

    /// Upsert a link; UNIQUE(chunk_id, source_id).
    async fn upsert_link(&self, kind: ChunkSourceKind, link: &ChunkLink) -> Result<()>;

    /// Backfill an embedding onto an existing chunk.
    async fn set_embedding(
        &self,
        chunk_id: Uuid,
        embedding: &[f32],
        provider: &str,
        model: &str,
    ) -> Result<()>;

    /// Chunks with no embedding yet, oldest first.
    async fn find_missing_embeddings(&self, limit: i64) -> Result<Vec<Chunk>>;

    /// Top-N chunks by cosine distance to `embedding`, filtered to chunks
    /// linked to fact-check items carrying one of `dataset_tags` (no filter
    /// when empty). Returns (chunk, distance, linked source ids).
    async fn vector_search(
        &self,
        embedding: &[f32],
        dataset_tags: &[String],
        limit: i64,
    ) -> Result<Vec<(Chunk, f64, Vec<Uuid>)>>;

    /// Top-N chunks by full-text rank on the search vector, same filter
    /// semantics as [`ChunkRepository::vector_search`]. Returns (chunk,
    /// rank, linked source ids).
    async fn keyword_search(
        &self,
        query: &str,
        dataset_tags: &[String],
        limit: i64,
    ) -> Result<Vec<(Chunk, f64, Vec<Uuid>)>>;

    /// Nearest chunks linked to previously-seen messages of a community.
    /// Returns (message id, distance) pairs, closest first.
    async fn nearest_previously_seen(
        &self,
        embedding: &[f32],
        community_server_id: Uuid,
        limit: i64,
    ) -> Result<Vec<(Uuid, f64)>>;
}

/// Fact-check candidate and item storage.
#[async_trait]
pub trait FactCheckRepository: Send + Sync {
    async fn get_candidate(&self, id: Uuid) -> Result<Option<FactCheckCandidate>>;

    /// Insert skipping duplicates of (source_url, claim_hash, dataset_name);
    /// returns whether a row was inserted.
    async fn insert_candidate(&self, candidate: &FactCheckCandidate) -> Result<bool>;

    async fn update_candidate_status(
        &self,
        id: Uuid,
        status: crate::entities::CandidateStatus,
        error_message: Option<String>,
    ) -> Result<()>;

    /// Insert the promoted item unless one with the same
    /// (source_url, claim_hash, dataset_name) already exists.
    async fn insert_item(&self, item: &FactCheckItem) -> Result<()>;

    async fn get_item(&self, id: Uuid) -> Result<Option<FactCheckItem>>;

    /// Stream a page of items for rechunking, keyset-paginated by id.
    async fn list_items_after(&self, after: Option<Uuid>, limit: i64) -> Result<Vec<FactCheckItem>>;

    async fn count_items(&self) -> Result<i64>;
}

/// Previously-seen message storage.
#[async_trait]
pub trait PreviouslySeenRepository: Send + Sync {
    async fn insert(&self, message: &PreviouslySeenMessage) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<PreviouslySeenMessage>>;

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<PreviouslySeenMessage>>;

    async fn list_for_community_after(
        &self,
        community_server_id: Uuid,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<PreviouslySeenMessage>>;
}

/// Community server storage.
#[async_trait]
pub trait CommunityServerRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<CommunityServer>>;

    async fn get_by_platform_id(&self, platform_id: &str) -> Result<Option<CommunityServer>>;

    /// Set or clear (`None`) the welcome message.
    async fn set_welcome_message(&self, id: Uuid, message: Option<String>) -> Result<()>;

    async fn count_notes(&self, community_server_id: Uuid) -> Result<u64>;
}

/// Scoring subsystem read access to notes and ratings, plus batch scoring
/// bookkeeping.
#[async_trait]
pub trait NoteRepository: Send + Sync {
    async fn notes_for_community(&self, community_server_id: Uuid) -> Result<Vec<Note>>;

    async fn ratings_for_community(&self, community_server_id: Uuid) -> Result<Vec<Rating>>;

    async fn set_helpfulness_score(&self, note_id: Uuid, score: f64) -> Result<()>;
}

/// Token-bucket pool persistence.
///
/// `try_acquire` must run in one serializable transaction so the capacity
/// invariant holds under concurrent acquirers.
#[async_trait]
pub trait TokenBucketRepository: Send + Sync {
    /// Idempotent weighted acquire: an existing open hold for the workflow
    /// counts as success, a missing pool refuses, and otherwise the hold is
    /// inserted only when the summed open weights stay within capacity.
    async fn try_acquire(&self, pool_name: &str, weight: i64, workflow_id: &str) -> Result<bool>;

    /// Stamp `released_at` on the open hold; returns whether a row changed.
    async fn release(&self, pool_name: &str, workflow_id: &str) -> Result<bool>;

    async fn status(&self, pool_name: &str) -> Result<Option<PoolStatus>>;

    /// Release holds whose owning workflow has been terminal since before
    /// `terminal_before`; returns the number reclaimed.
    async fn reclaim_expired(&self, terminal_before: DateTime<Utc>) -> Result<u64>;

    /// Create a pool if absent.
    async fn ensure_pool(&self, pool_name: &str, capacity: i64) -> Result<()>;
}

/// Workflow execution persistence for the orchestrator.
#[async_trait]
pub trait WorkflowRepository: Send + Sync {
    /// Insert unless the deduplication id was already used; returns the
    /// workflow id that owns the deduplication id (existing or new).
    async fn insert_deduplicated(&self, execution: &WorkflowExecution) -> Result<String>;

    async fn get(&self, workflow_id: &str) -> Result<Option<WorkflowExecution>>;

    async fn set_status(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        error: Option<String>,
    ) -> Result<()>;

    /// Persist one step result keyed by (workflow_id, step_id).
    async fn save_step_result(&self, workflow_id: &str, step_id: &str, result: Value) -> Result<()>;

    /// Executions enqueued or running, oldest first, for crash recovery.
    async fn find_resumable(&self, queue_name: &str, limit: i64) -> Result<Vec<WorkflowExecution>>;
}

/// Audit record persistence.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    async fn insert(&self, record: &AuditRecord) -> Result<()>;
}
