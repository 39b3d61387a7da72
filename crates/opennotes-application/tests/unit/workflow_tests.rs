//! Workflow engine: deduplication, step persistence, final-failure hooks.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use opennotes_application::workflow::{
    EnqueueOptions, RetryPolicy, Workflow, WorkflowContext, WorkflowEngine,
};
use opennotes_domain::entities::WorkflowStatus;
use opennotes_domain::error::{Error, Result};
use opennotes_domain::ports::WorkflowRepository;

use crate::fakes::InMemoryWorkflows;

struct CountingWorkflow {
    runs: Arc<AtomicU32>,
    fail: bool,
}

#[async_trait]
impl Workflow for CountingWorkflow {
    fn name(&self) -> &str {
        "counting"
    }

    async fn run(&self, ctx: &WorkflowContext, _input: Option<Value>) -> Result<Value> {
        let runs = Arc::clone(&self.runs);
        let fail = self.fail;
        ctx.step("only_step", RetryPolicy::none(), move || {
            let runs = Arc::clone(&runs);
            Box::pin(async move {
                runs.fetch_add(1, Ordering::SeqCst);
                if fail {
                    Err(Error::internal("step failed"))
                } else {
                    Ok(Value::from("done"))
                }
            })
        })
        .await
    }
}

async fn settle() {
    // Executions run on spawned tasks; give them a few polls.
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn enqueue_runs_the_workflow_to_success() {
    let repo = Arc::new(InMemoryWorkflows::new());
    let engine = Arc::new(WorkflowEngine::new(repo.clone()));
    engine.register_queue("q", 2);
    let runs = Arc::new(AtomicU32::new(0));
    engine.register_workflow(Arc::new(CountingWorkflow {
        runs: Arc::clone(&runs),
        fail: false,
    }));

    let workflow_id = engine
        .enqueue(
            EnqueueOptions {
                queue_name: "q".to_owned(),
                workflow_name: "counting".to_owned(),
                workflow_id: None,
                deduplication_id: None,
            },
            None,
        )
        .await
        .unwrap();
    settle().await;

    assert_eq!(runs.load(Ordering::SeqCst), 1);
    let execution = repo.get(&workflow_id).await.unwrap().unwrap();
    assert_eq!(execution.status, WorkflowStatus::Succeeded);
    assert_eq!(
        execution.step_state.get("only_step"),
        Some(&Value::from("done"))
    );
}

#[tokio::test]
async fn duplicate_deduplication_id_returns_existing_handle() {
    let repo = Arc::new(InMemoryWorkflows::new());
    let engine = Arc::new(WorkflowEngine::new(repo.clone()));
    engine.register_queue("q", 1);
    let runs = Arc::new(AtomicU32::new(0));
    engine.register_workflow(Arc::new(CountingWorkflow {
        runs: Arc::clone(&runs),
        fail: false,
    }));

    let options = |id: &str| EnqueueOptions {
        queue_name: "q".to_owned(),
        workflow_name: "counting".to_owned(),
        workflow_id: Some(id.to_owned()),
        deduplication_id: Some("job-42".to_owned()),
    };

    let first = engine.enqueue(options("wf-a"), None).await.unwrap();
    let second = engine.enqueue(options("wf-b"), None).await.unwrap();
    assert_eq!(first, "wf-a");
    assert_eq!(second, "wf-a");
    settle().await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn failed_workflow_invokes_final_failure_hook() {
    let repo = Arc::new(InMemoryWorkflows::new());
    let engine = Arc::new(WorkflowEngine::new(repo.clone()));
    engine.register_queue("q", 1);
    engine.register_workflow(Arc::new(CountingWorkflow {
        runs: Arc::new(AtomicU32::new(0)),
        fail: true,
    }));

    let hook_calls = Arc::new(AtomicU32::new(0));
    let hook_counter = Arc::clone(&hook_calls);
    engine.on_final_failure(
        "counting",
        Arc::new(move |_workflow_id, _error| {
            let hook_counter = Arc::clone(&hook_counter);
            Box::pin(async move {
                hook_counter.fetch_add(1, Ordering::SeqCst);
            })
        }),
    );

    let workflow_id = engine
        .enqueue(
            EnqueueOptions {
                queue_name: "q".to_owned(),
                workflow_name: "counting".to_owned(),
                workflow_id: None,
                deduplication_id: None,
            },
            None,
        )
        .await
        .unwrap();
    settle().await;

    assert_eq!(hook_calls.load(Ordering::SeqCst), 1);
    let execution = repo.get(&workflow_id).await.unwrap().unwrap();
    assert_eq!(execution.status, WorkflowStatus::Failed);
    assert!(execution.error.as_deref().unwrap_or_default().contains("step failed"));
}

#[tokio::test]
async fn completed_steps_are_skipped_on_resume() {
    let repo = Arc::new(InMemoryWorkflows::new());
    let engine = Arc::new(WorkflowEngine::new(repo.clone()));
    engine.register_queue("q", 1);
    let runs = Arc::new(AtomicU32::new(0));
    engine.register_workflow(Arc::new(CountingWorkflow {
        runs: Arc::clone(&runs),
        fail: false,
    }));

    // Simulate a crash: a persisted execution with the step already done.
    let mut execution = opennotes_domain::entities::WorkflowExecution {
        workflow_id: "wf-resume".to_owned(),
        workflow_name: "counting".to_owned(),
        queue_name: "q".to_owned(),
        deduplication_id: None,
        status: WorkflowStatus::Running,
        step_state: Default::default(),
        input: None,
        error: None,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };
    execution
        .step_state
        .insert("only_step".to_owned(), Value::from("done"));
    repo.executions
        .lock()
        .unwrap()
        .insert(execution.workflow_id.clone(), execution);

    let resumed = engine.resume_queue("q", 10).await.unwrap();
    assert_eq!(resumed, 1);
    settle().await;

    // The step body never re-ran; its persisted result was reused.
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    let execution = repo.get("wf-resume").await.unwrap().unwrap();
    assert_eq!(execution.status, WorkflowStatus::Succeeded);
}

#[tokio::test]
async fn transient_step_errors_retry_per_policy() {
    struct FlakyWorkflow {
        attempts: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Workflow for FlakyWorkflow {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn run(&self, ctx: &WorkflowContext, _input: Option<Value>) -> Result<Value> {
            let attempts = Arc::clone(&self.attempts);
            ctx.step(
                "flaky_step",
                RetryPolicy {
                    max_attempts: 3,
                    base_interval: Duration::from_millis(1),
                    backoff_rate: 1.0,
                },
                move || {
                    let attempts = Arc::clone(&attempts);
                    Box::pin(async move {
                        if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(Error::upstream("timeout"))
                        } else {
                            Ok(Value::from(42))
                        }
                    })
                },
            )
            .await
        }
    }

    let repo = Arc::new(InMemoryWorkflows::new());
    let engine = Arc::new(WorkflowEngine::new(repo.clone()));
    engine.register_queue("q", 1);
    let attempts = Arc::new(AtomicU32::new(0));
    engine.register_workflow(Arc::new(FlakyWorkflow {
        attempts: Arc::clone(&attempts),
    }));

    let workflow_id = engine
        .enqueue(
            EnqueueOptions {
                queue_name: "q".to_owned(),
                workflow_name: "flaky".to_owned(),
                workflow_id: None,
                deduplication_id: None,
            },
            None,
        )
        .await
        .unwrap();
    settle().await;

    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    let execution = repo.get(&workflow_id).await.unwrap().unwrap();
    assert_eq!(execution.status, WorkflowStatus::Succeeded);
}
