//! Durable workflow orchestration.

mod engine;
mod retry;

pub use engine::{EnqueueOptions, FinalFailureHook, Workflow, WorkflowContext, WorkflowEngine};
pub use retry::RetryPolicy;
