//! Durable workflow engine.
//!
//! A workflow is a named function composed of steps. Each step's result is
//! persisted keyed by (workflow_id, step_id); on crash the workflow resumes
//! and completed steps return their stored result instead of re-running.
//! Steps must therefore be idempotent. Named queues bound concurrency;
//! enqueueing with an already-used deduplication id is a no-op that returns
//! the existing handle.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};
use uuid::Uuid;

use opennotes_domain::entities::{WorkflowExecution, WorkflowStatus};
use opennotes_domain::error::{Error, Result};
use opennotes_domain::ports::WorkflowRepository;

use super::retry::RetryPolicy;

/// Options for [`WorkflowEngine::enqueue`].
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub queue_name: String,
    pub workflow_name: String,
    /// Explicit id; generated when absent.
    pub workflow_id: Option<String>,
    /// Prevents duplicate enqueue of the same logical workflow.
    pub deduplication_id: Option<String>,
}

/// Step context handed to a running workflow.
pub struct WorkflowContext {
    workflow_id: String,
    repo: Arc<dyn WorkflowRepository>,
    step_state: DashMap<String, Value>,
}

impl WorkflowContext {
    #[must_use]
    pub fn workflow_id(&self) -> &str {
        &self.workflow_id
    }

    /// Run a step, or return its persisted result if it already completed
    /// in a previous incarnation of this workflow.
    ///
    /// Transient errors retry per `policy`; exhausted retries fail the step
    /// and with it the workflow.
    pub async fn step<F>(&self, step_id: &str, policy: RetryPolicy, f: F) -> Result<Value>
    where
        F: Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync,
    {
        if let Some(saved) = self.step_state.get(step_id) {
            info!(
                workflow_id = self.workflow_id,
                step_id, "Step already completed, returning persisted result"
            );
            return Ok(saved.clone());
        }

        let mut attempt = 0u32;
        loop {
            match f().await {
                Ok(result) => {
                    self.repo
                        .save_step_result(&self.workflow_id, step_id, result.clone())
                        .await?;
                    self.step_state.insert(step_id.to_owned(), result.clone());
                    return Ok(result);
                }
                Err(e) if e.is_transient() && attempt + 1 < policy.max_attempts => {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        workflow_id = self.workflow_id,
                        step_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Step failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// A durable workflow implementation, registered by name.
#[async_trait]
pub trait Workflow: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &WorkflowContext, input: Option<Value>) -> Result<Value>;
}

/// Callback invoked when a workflow exhausts its retries and fails.
pub type FinalFailureHook =
    Arc<dyn Fn(String, String) -> BoxFuture<'static, ()> + Send + Sync + 'static>;

/// The orchestrator: registry, queues and execution driver.
pub struct WorkflowEngine {
    repo: Arc<dyn WorkflowRepository>,
    workflows: DashMap<String, Arc<dyn Workflow>>,
    queues: DashMap<String, Arc<Semaphore>>,
    final_failure_hooks: DashMap<String, FinalFailureHook>,
}

impl WorkflowEngine {
    #[must_use]
    pub fn new(repo: Arc<dyn WorkflowRepository>) -> Self {
        Self {
            repo,
            workflows: DashMap::new(),
            queues: DashMap::new(),
            final_failure_hooks: DashMap::new(),
        }
    }

    /// Register a workflow implementation under its name.
    pub fn register_workflow(&self, workflow: Arc<dyn Workflow>) {
        self.workflows.insert(workflow.name().to_owned(), workflow);
    }

    /// Declare a queue with a concurrency ceiling.
    pub fn register_queue(&self, name: &str, concurrency: usize) {
        self.queues
            .insert(name.to_owned(), Arc::new(Semaphore::new(concurrency.max(1))));
    }

    /// Register an on-last-retry callback for a workflow name, so final
    /// failures can trigger alerts and cleanup.
    pub fn on_final_failure(&self, workflow_name: &str, hook: FinalFailureHook) {
        self.final_failure_hooks.insert(workflow_name.to_owned(), hook);
    }

    /// Enqueue a workflow. Returns the workflow id owning the execution,
    /// which is the existing one when the deduplication id was already
    /// used.
    pub async fn enqueue(
        self: &Arc<Self>,
        options: EnqueueOptions,
        input: Option<Value>,
    ) -> Result<String> {
        if !self.workflows.contains_key(&options.workflow_name) {
            return Err(Error::internal(format!(
                "No workflow registered under '{}'",
                options.workflow_name
            )));
        }

        let workflow_id = options
            .workflow_id
            .clone()
            .unwrap_or_else(|| Uuid::now_v7().to_string());
        let now = chrono::Utc::now();
        let execution = WorkflowExecution {
            workflow_id: workflow_id.clone(),
            workflow_name: options.workflow_name.clone(),
            queue_name: options.queue_name.clone(),
            deduplication_id: options.deduplication_id.clone(),
            status: WorkflowStatus::Enqueued,
            step_state: Default::default(),
            input: input.clone(),
            error: None,
            created_at: now,
            updated_at: now,
        };

        let owner_id = self.repo.insert_deduplicated(&execution).await?;
        if owner_id != workflow_id {
            info!(
                workflow_id = owner_id,
                deduplication_id = ?options.deduplication_id,
                "Deduplicated enqueue, returning existing handle"
            );
            return Ok(owner_id);
        }

        self.spawn_execution(execution);
        Ok(workflow_id)
    }

    /// Resume enqueued/running executions after a restart.
    pub async fn resume_queue(self: &Arc<Self>, queue_name: &str, limit: i64) -> Result<usize> {
        let resumable = self.repo.find_resumable(queue_name, limit).await?;
        let count = resumable.len();
        for execution in resumable {
            self.spawn_execution(execution);
        }
        if count > 0 {
            info!(queue_name, count, "Resuming workflows");
        }
        Ok(count)
    }

    fn spawn_execution(self: &Arc<Self>, execution: WorkflowExecution) {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.drive(execution).await;
        });
    }

    async fn drive(self: Arc<Self>, execution: WorkflowExecution) {
        let Some(workflow) = self
            .workflows
            .get(&execution.workflow_name)
            .map(|w| Arc::clone(w.value()))
        else {
            error!(
                workflow_name = execution.workflow_name,
                "No registered workflow for persisted execution"
            );
            return;
        };

        let semaphore = self
            .queues
            .entry(execution.queue_name.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(4)))
            .clone();
        let Ok(_permit) = semaphore.acquire().await else {
            return;
        };

        let workflow_id = execution.workflow_id.clone();
        if let Err(e) = self
            .repo
            .set_status(&workflow_id, WorkflowStatus::Running, None)
            .await
        {
            error!(workflow_id, error = %e, "Failed to mark workflow running");
            return;
        }

        let ctx = WorkflowContext {
            workflow_id: workflow_id.clone(),
            repo: Arc::clone(&self.repo),
            step_state: execution.step_state.clone().into_iter().collect(),
        };

        match workflow.run(&ctx, execution.input.clone()).await {
            Ok(_) => {
                if let Err(e) = self
                    .repo
                    .set_status(&workflow_id, WorkflowStatus::Succeeded, None)
                    .await
                {
                    error!(workflow_id, error = %e, "Failed to mark workflow succeeded");
                }
            }
            Err(e) => {
                let message = e.to_string();
                warn!(workflow_id, error = %message, "Workflow failed");
                if let Err(e) = self
                    .repo
                    .set_status(&workflow_id, WorkflowStatus::Failed, Some(message.clone()))
                    .await
                {
                    error!(workflow_id, error = %e, "Failed to mark workflow failed");
                }
                if let Some(hook) = self
                    .final_failure_hooks
                    .get(&execution.workflow_name)
                    .map(|h| Arc::clone(h.value()))
                {
                    hook(workflow_id.clone(), message).await;
                }
            }
        }
    }
}
