//! Rechunk job endpoints.
//!
//! The endpoint acquires the rechunk lock before dispatching and answers
//! 409 when the lock is held; the worker only ever releases. The
//! concurrent-creation guard on the job record backstops the lock: under
//! concurrent requests exactly one job is created.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use opennotes_application::services::rechunk::DEFAULT_BATCH_SIZE;
use opennotes_application::services::RechunkService;
use opennotes_application::workflow::EnqueueOptions;
use opennotes_domain::entities::ChunkSourceKind;
use opennotes_domain::error::Error;

use crate::error::ApiResult;
use crate::jsonapi::Document;
use crate::state::AppContext;

pub fn router() -> Router<AppContext> {
    Router::new()
        .route(
            "/communities/{community_id}/rechunk/fact-checks",
            post(rechunk_fact_checks),
        )
        .route(
            "/communities/{community_id}/rechunk/previously-seen",
            post(rechunk_previously_seen),
        )
}

#[derive(Debug, Deserialize, Default)]
struct RechunkRequest {
    batch_size: Option<i64>,
    #[serde(default)]
    dry_run: bool,
}

#[derive(Debug, Serialize)]
struct RechunkAttributes {
    job_id: String,
    workflow_id: String,
    job_type: String,
    batch_size: i64,
    dry_run: bool,
}

async fn rechunk_fact_checks(
    state: State<AppContext>,
    path: Path<Uuid>,
    body: Option<Json<RechunkRequest>>,
) -> ApiResult<impl IntoResponse> {
    dispatch_rechunk(state, path, body, ChunkSourceKind::FactCheck).await
}

async fn rechunk_previously_seen(
    state: State<AppContext>,
    path: Path<Uuid>,
    body: Option<Json<RechunkRequest>>,
) -> ApiResult<impl IntoResponse> {
    dispatch_rechunk(state, path, body, ChunkSourceKind::PreviouslySeen).await
}

async fn dispatch_rechunk(
    State(context): State<AppContext>,
    Path(community_id): Path<Uuid>,
    body: Option<Json<RechunkRequest>>,
    kind: ChunkSourceKind,
) -> ApiResult<impl IntoResponse> {
    let body = body.map(|Json(body)| body).unwrap_or_default();
    let batch_size = body.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
    if batch_size <= 0 {
        return Err(Error::validation("batch_size must be positive").into());
    }

    let community = community_id.to_string();
    let acquired = context
        .locks
        .acquire(kind.as_str(), Some(&community), RechunkService::lock_ttl())
        .await;
    if !acquired {
        return Err(Error::conflict(format!(
            "A {} rechunk is already running for this community",
            kind.as_str()
        ))
        .into());
    }

    let job = match context
        .rechunk
        .create_job(kind, community_id, batch_size, body.dry_run)
        .await
    {
        Ok(job) => job,
        Err(e) => {
            // Job creation failed after we took the lock; give it back so
            // the next request is not locked out for the full TTL.
            context.locks.release(kind.as_str(), Some(&community)).await;
            return Err(e.into());
        }
    };

    let workflow_id = match context
        .engine
        .enqueue(
            EnqueueOptions {
                queue_name: "rechunk".to_owned(),
                workflow_name: RechunkService::job_type(kind),
                workflow_id: None,
                deduplication_id: Some(job.id.to_string()),
            },
            Some(Value::String(job.id.to_string())),
        )
        .await
    {
        Ok(workflow_id) => workflow_id,
        Err(e) => {
            context.locks.release(kind.as_str(), Some(&community)).await;
            return Err(e.into());
        }
    };

    Ok((
        StatusCode::ACCEPTED,
        Document::new(
            "rechunk-jobs",
            job.id,
            RechunkAttributes {
                job_id: job.id.to_string(),
                workflow_id,
                job_type: job.job_type,
                batch_size,
                dry_run: body.dry_run,
            },
        ),
    ))
}
