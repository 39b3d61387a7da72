//! Batch job endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

use opennotes_domain::entities::{BatchJob, JobStatus};
use opennotes_domain::error::Error;

use crate::error::ApiResult;
use crate::jsonapi::{CollectionDocument, Document, Resource};
use crate::state::AppContext;

pub fn router() -> Router<AppContext> {
    Router::new()
        .route("/batch-jobs", post(create_job).get(list_jobs))
        .route("/batch-jobs/{id}", get(get_job).delete(cancel_job))
        .route("/batch-jobs/{id}/progress", get(get_progress))
}

#[derive(Debug, Deserialize)]
struct CreateJobRequest {
    job_type: String,
    #[serde(default)]
    total_tasks: i64,
    #[serde(default)]
    metadata: BTreeMap<String, Value>,
}

#[derive(Debug, Serialize)]
struct JobAttributes {
    job_type: String,
    status: String,
    total_tasks: i64,
    completed_tasks: i64,
    failed_tasks: i64,
    metadata: BTreeMap<String, Value>,
    created_at: chrono::DateTime<chrono::Utc>,
    started_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

fn job_resource(job: BatchJob) -> Resource<JobAttributes> {
    Resource {
        resource_type: "batch-jobs".to_owned(),
        id: job.id.to_string(),
        attributes: JobAttributes {
            job_type: job.job_type,
            status: job.status.as_str().to_owned(),
            total_tasks: job.total_tasks,
            completed_tasks: job.completed_tasks,
            failed_tasks: job.failed_tasks,
            metadata: job.metadata,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            updated_at: job.updated_at,
        },
    }
}

fn job_document(job: BatchJob) -> Document<JobAttributes> {
    let resource = job_resource(job);
    Document {
        data: resource,
        meta: None,
        jsonapi: crate::jsonapi::JsonApiVersion::default(),
    }
}

async fn create_job(
    State(context): State<AppContext>,
    Json(body): Json<CreateJobRequest>,
) -> ApiResult<impl IntoResponse> {
    if body.job_type.trim().is_empty() {
        return Err(Error::validation("job_type must not be empty").into());
    }
    if body.total_tasks < 0 {
        return Err(Error::validation("total_tasks must not be negative").into());
    }
    let job = context
        .jobs
        .create_job(&body.job_type, body.total_tasks, body.metadata)
        .await?;
    Ok((StatusCode::CREATED, job_document(job)))
}

async fn get_job(
    State(context): State<AppContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Document<JobAttributes>> {
    let job = context.jobs.get_job(id).await?;
    Ok(job_document(job))
}

#[derive(Debug, Deserialize)]
struct ListJobsQuery {
    job_type: Option<String>,
    status: Option<String>,
    #[serde(default = "default_limit")]
    limit: i64,
}

fn default_limit() -> i64 {
    50
}

async fn list_jobs(
    State(context): State<AppContext>,
    Query(query): Query<ListJobsQuery>,
) -> ApiResult<CollectionDocument<JobAttributes>> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(Error::validation)?;
    let jobs = context
        .jobs
        .list_jobs(query.job_type.as_deref(), status, query.limit)
        .await?;
    Ok(CollectionDocument::new(
        jobs.into_iter().map(job_resource).collect(),
    ))
}

#[derive(Debug, Serialize)]
struct ProgressAttributes {
    processed_count: i64,
    error_count: i64,
    current_item: Option<String>,
    rate: f64,
    started_at: f64,
    last_update_at: f64,
}

async fn get_progress(
    State(context): State<AppContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Document<ProgressAttributes>> {
    let progress = context.jobs.get_progress(id).await?;
    Ok(Document::new(
        "batch-job-progress",
        id,
        ProgressAttributes {
            processed_count: progress.processed_count,
            error_count: progress.error_count,
            current_item: progress.current_item.clone(),
            rate: progress.rate(),
            started_at: progress.started_at,
            last_update_at: progress.last_update_at,
        },
    ))
}

/// DELETE cancels; 409 when the job is already terminal.
async fn cancel_job(
    State(context): State<AppContext>,
    Path(id): Path<Uuid>,
) -> ApiResult<Document<JobAttributes>> {
    let job = context.jobs.cancel_job(id).await?;
    Ok(job_document(job))
}
