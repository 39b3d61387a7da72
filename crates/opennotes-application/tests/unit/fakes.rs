//! In-memory test doubles for the domain ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

use opennotes_domain::entities::{
    BatchJob, Chunk, ChunkLink, ChunkSourceKind, JobStatus, OpenHold, PoolStatus,
    WorkflowExecution, WorkflowStatus,
};
use opennotes_domain::error::{Error, Result};
use opennotes_domain::events::EventEnvelope;
use opennotes_domain::ports::cache::CacheSubscriptionHandler;
use opennotes_domain::ports::{
    AuditRepository, BatchJobRepository, CacheProvider, ChunkRepository, EmbeddingProvider,
    EventBus, EventHandler, SubscriptionHealth, TokenBucketRepository, WorkflowRepository,
};

// ============================================================================
// Cache
// ============================================================================

#[derive(Default)]
pub struct InMemoryCache {
    pub kv: Mutex<HashMap<String, String>>,
    pub hashes: Mutex<HashMap<String, BTreeMap<String, String>>>,
    pub sets: Mutex<HashMap<String, HashSet<String>>>,
    /// When set, every operation fails, for degradation tests.
    pub broken: std::sync::atomic::AtomicBool,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn break_backend(&self) {
        self.broken.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.broken.load(std::sync::atomic::Ordering::SeqCst) {
            Err(Error::cache("backend down"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheProvider for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(self.kv.lock().unwrap().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str, _ttl: Option<Duration>) -> Result<()> {
        self.check()?;
        self.kv.lock().unwrap().insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check()?;
        let kv = self.kv.lock().unwrap().remove(key).is_some();
        let hashed = self.hashes.lock().unwrap().remove(key).is_some();
        let set = self.sets.lock().unwrap().remove(key).is_some();
        Ok(kv || hashed || set)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check()?;
        Ok(self.kv.lock().unwrap().contains_key(key))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        self.check()?;
        let prefix = pattern.trim_end_matches('*');
        Ok(self
            .kv
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        self.check()?;
        let kv = self.kv.lock().unwrap();
        Ok(keys.iter().map(|k| kv.get(k).cloned()).collect())
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        self.check()?;
        let mut hashes = self.hashes.lock().unwrap();
        let entry = hashes
            .entry(key.to_owned())
            .or_default()
            .entry(field.to_owned())
            .or_insert_with(|| "0".to_owned());
        let next = entry.parse::<i64>().unwrap_or(0) + delta;
        *entry = next.to_string();
        Ok(next)
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>> {
        self.check()?;
        Ok(self
            .hashes
            .lock()
            .unwrap()
            .get(key)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.check()?;
        self.hashes
            .lock()
            .unwrap()
            .entry(key.to_owned())
            .or_default()
            .insert(field.to_owned(), value.to_owned());
        Ok(())
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> Result<()> {
        self.check()
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        self.check()?;
        self.sets
            .lock()
            .unwrap()
            .entry(key.to_owned())
            .or_default()
            .insert(member.to_owned());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        self.check()?;
        if let Some(set) = self.sets.lock().unwrap().get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.check()?;
        Ok(self
            .sets
            .lock()
            .unwrap()
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn publish(&self, _channel: &str, _message: &str) -> Result<()> {
        self.check()
    }

    async fn subscribe(&self, _channel: &str, _handler: CacheSubscriptionHandler) -> Result<()> {
        self.check()
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Batch jobs
// ============================================================================

#[derive(Default)]
pub struct InMemoryJobs {
    pub jobs: Mutex<HashMap<Uuid, BatchJob>>,
}

impl InMemoryJobs {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BatchJobRepository for InMemoryJobs {
    async fn insert(&self, job: &BatchJob) -> Result<()> {
        self.jobs.lock().unwrap().insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<BatchJob>> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn list(
        &self,
        job_type: Option<&str>,
        status: Option<JobStatus>,
        limit: i64,
    ) -> Result<Vec<BatchJob>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| job_type.is_none_or(|t| j.job_type == t))
            .filter(|j| status.is_none_or(|s| j.status == s))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn transition(
        &self,
        id: Uuid,
        next: JobStatus,
        error: Option<String>,
    ) -> Result<BatchJob> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("batch job {id}")))?;
        job.check_transition(next)?;
        job.status = next;
        let now = Utc::now();
        if next == JobStatus::InProgress && job.started_at.is_none() {
            job.started_at = Some(now);
        }
        if next.is_terminal() {
            job.completed_at = Some(now);
        }
        if let Some(error) = error {
            job.metadata.insert("error".to_owned(), Value::String(error));
        }
        job.updated_at = now;
        Ok(job.clone())
    }

    async fn increment_progress(
        &self,
        id: Uuid,
        completed_delta: i64,
        failed_delta: i64,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("batch job {id}")))?;
        job.completed_tasks += completed_delta;
        job.failed_tasks += failed_delta;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn merge_metadata(&self, id: Uuid, patch: BTreeMap<String, Value>) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("batch job {id}")))?;
        job.metadata.extend(patch);
        Ok(())
    }

    async fn insert_guarded(
        &self,
        job: &BatchJob,
        guard_job_type: &str,
        guard_resource_id: &str,
    ) -> Result<()> {
        // The Mutex plays the part of the sentinel row lock.
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(active) = jobs.values().find(|j| {
            j.job_type == guard_job_type
                && !j.status.is_terminal()
                && j.metadata.get("resource_id").and_then(Value::as_str) == Some(guard_resource_id)
        }) {
            return Err(Error::ActiveJobExists { job_id: active.id });
        }
        let mut job = job.clone();
        job.metadata.insert(
            "resource_id".to_owned(),
            Value::String(guard_resource_id.to_owned()),
        );
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn find_untouched_since(
        &self,
        cutoff: DateTime<Utc>,
        statuses: &[JobStatus],
    ) -> Result<Vec<BatchJob>> {
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|j| statuses.contains(&j.status) && j.updated_at < cutoff)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Event bus
// ============================================================================

#[derive(Default)]
pub struct RecordingBus {
    pub published: Mutex<Vec<EventEnvelope>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<EventEnvelope> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventBus for RecordingBus {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<()> {
        self.published.lock().unwrap().push(envelope.clone());
        Ok(())
    }

    async fn subscribe_durable(
        &self,
        _consumer_name: &str,
        _subject: &str,
        _handler: std::sync::Arc<dyn EventHandler>,
    ) -> Result<()> {
        Ok(())
    }

    async fn check_subscription_health(&self) -> Result<Vec<SubscriptionHealth>> {
        Ok(Vec::new())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Token bucket
// ============================================================================

pub struct InMemoryTokenBucket {
    pub capacity: i64,
    pub holds: Mutex<Vec<(String, i64, Option<DateTime<Utc>>)>>,
}

impl InMemoryTokenBucket {
    pub fn new(capacity: i64) -> Self {
        Self {
            capacity,
            holds: Mutex::new(Vec::new()),
        }
    }

    pub fn held(&self) -> i64 {
        self.holds
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, _, released)| released.is_none())
            .map(|(_, w, _)| w)
            .sum()
    }
}

#[async_trait]
impl TokenBucketRepository for InMemoryTokenBucket {
    async fn try_acquire(&self, _pool: &str, weight: i64, workflow_id: &str) -> Result<bool> {
        let mut holds = self.holds.lock().unwrap();
        if holds
            .iter()
            .any(|(wf, _, released)| wf == workflow_id && released.is_none())
        {
            return Ok(true);
        }
        let held: i64 = holds
            .iter()
            .filter(|(_, _, released)| released.is_none())
            .map(|(_, w, _)| w)
            .sum();
        if held + weight > self.capacity {
            return Ok(false);
        }
        holds.push((workflow_id.to_owned(), weight, None));
        Ok(true)
    }

    async fn release(&self, _pool: &str, workflow_id: &str) -> Result<bool> {
        let mut holds = self.holds.lock().unwrap();
        for (wf, _, released) in holds.iter_mut() {
            if wf == workflow_id && released.is_none() {
                *released = Some(Utc::now());
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn status(&self, pool: &str) -> Result<Option<PoolStatus>> {
        let holds = self.holds.lock().unwrap();
        let open_holds: Vec<OpenHold> = holds
            .iter()
            .filter(|(_, _, released)| released.is_none())
            .map(|(wf, w, _)| OpenHold {
                workflow_id: wf.clone(),
                weight: *w,
                acquired_at: Utc::now(),
            })
            .collect();
        let held: i64 = open_holds.iter().map(|h| h.weight).sum();
        Ok(Some(PoolStatus {
            name: pool.to_owned(),
            capacity: self.capacity,
            held,
            available: self.capacity - held,
            open_holds,
        }))
    }

    async fn reclaim_expired(&self, _terminal_before: DateTime<Utc>) -> Result<u64> {
        Ok(0)
    }

    async fn ensure_pool(&self, _pool: &str, _capacity: i64) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// Embeddings
// ============================================================================

pub struct ScriptedEmbeddingProvider {
    /// Errors returned before succeeding.
    pub failures: Mutex<Vec<Error>>,
    pub calls: std::sync::atomic::AtomicU32,
}

impl ScriptedEmbeddingProvider {
    pub fn succeeding() -> Self {
        Self {
            failures: Mutex::new(Vec::new()),
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }

    pub fn failing_with(failures: Vec<Error>) -> Self {
        Self {
            failures: Mutex::new(failures),
            calls: std::sync::atomic::AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for ScriptedEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if let Some(error) = self.failures.lock().unwrap().pop() {
            return Err(error);
        }
        // Deterministic toy embedding from the text length.
        Ok(vec![text.len() as f32; 4])
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }

    fn model_name(&self) -> &str {
        "toy-embedding"
    }

    fn dimensions(&self) -> usize {
        4
    }
}

// ============================================================================
// Chunk repository (empty; search legs unused in these tests)
// ============================================================================

pub struct EmptyChunks;

#[async_trait]
impl ChunkRepository for EmptyChunks {
    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<Chunk> {
        Ok(chunk.clone())
    }

    async fn upsert_link(&self, _kind: ChunkSourceKind, _link: &ChunkLink) -> Result<()> {
        Ok(())
    }

    async fn set_embedding(
        &self,
        _chunk_id: Uuid,
        _embedding: &[f32],
        _provider: &str,
        _model: &str,
    ) -> Result<()> {
        Ok(())
    }

    async fn find_missing_embeddings(&self, _limit: i64) -> Result<Vec<Chunk>> {
        Ok(Vec::new())
    }

    async fn vector_search(
        &self,
        _embedding: &[f32],
        _dataset_tags: &[String],
        _limit: i64,
    ) -> Result<Vec<(Chunk, f64, Vec<Uuid>)>> {
        Ok(Vec::new())
    }

    async fn keyword_search(
        &self,
        _query: &str,
        _dataset_tags: &[String],
        _limit: i64,
    ) -> Result<Vec<(Chunk, f64, Vec<Uuid>)>> {
        Ok(Vec::new())
    }

    async fn nearest_previously_seen(
        &self,
        _embedding: &[f32],
        _community_server_id: Uuid,
        _limit: i64,
    ) -> Result<Vec<(Uuid, f64)>> {
        Ok(Vec::new())
    }
}

// ============================================================================
// Workflow repository
// ============================================================================

#[derive(Default)]
pub struct InMemoryWorkflows {
    pub executions: Mutex<HashMap<String, WorkflowExecution>>,
}

impl InMemoryWorkflows {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowRepository for InMemoryWorkflows {
    async fn insert_deduplicated(&self, execution: &WorkflowExecution) -> Result<String> {
        let mut executions = self.executions.lock().unwrap();
        if let Some(dedup) = &execution.deduplication_id {
            if let Some(owner) = executions
                .values()
                .find(|e| e.deduplication_id.as_ref() == Some(dedup))
            {
                return Ok(owner.workflow_id.clone());
            }
        }
        executions.insert(execution.workflow_id.clone(), execution.clone());
        Ok(execution.workflow_id.clone())
    }

    async fn get(&self, workflow_id: &str) -> Result<Option<WorkflowExecution>> {
        Ok(self.executions.lock().unwrap().get(workflow_id).cloned())
    }

    async fn set_status(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        error: Option<String>,
    ) -> Result<()> {
        let mut executions = self.executions.lock().unwrap();
        let execution = executions
            .get_mut(workflow_id)
            .ok_or_else(|| Error::not_found(format!("workflow {workflow_id}")))?;
        execution.status = status;
        if status.is_terminal() {
            execution.deduplication_id = None;
        }
        if let Some(error) = error {
            execution.error = Some(error);
        }
        execution.updated_at = Utc::now();
        Ok(())
    }

    async fn save_step_result(
        &self,
        workflow_id: &str,
        step_id: &str,
        result: Value,
    ) -> Result<()> {
        let mut executions = self.executions.lock().unwrap();
        let execution = executions
            .get_mut(workflow_id)
            .ok_or_else(|| Error::not_found(format!("workflow {workflow_id}")))?;
        execution.step_state.insert(step_id.to_owned(), result);
        Ok(())
    }

    async fn find_resumable(&self, queue_name: &str, limit: i64) -> Result<Vec<WorkflowExecution>> {
        Ok(self
            .executions
            .lock()
            .unwrap()
            .values()
            .filter(|e| {
                e.queue_name == queue_name
                    && matches!(e.status, WorkflowStatus::Enqueued | WorkflowStatus::Running)
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

// ============================================================================
// Audit repository
// ============================================================================

pub struct SlowAuditRepository {
    pub delay: Duration,
    pub inserted: Mutex<Vec<Uuid>>,
}

impl SlowAuditRepository {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            inserted: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AuditRepository for SlowAuditRepository {
    async fn insert(&self, record: &opennotes_domain::entities::AuditRecord) -> Result<()> {
        tokio::time::sleep(self.delay).await;
        self.inserted.lock().unwrap().push(record.id);
        Ok(())
    }
}
