//! Audit emission for state-changing requests.
//!
//! The record is built after the response and handed to the bounded audit
//! publisher; nothing on this path can delay or fail the request.

use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use serde_json::Value;
use std::time::Instant;
use uuid::Uuid;

use opennotes_application::services::audit::{MAX_BODY_SIZE, truncate_body};
use opennotes_domain::entities::AuditRecord;

use crate::middleware::auth::AuthContext;
use crate::state::AppContext;

/// Capture state-changing authenticated requests into the audit pipeline.
pub async fn audit(State(context): State<AppContext>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let is_mutation = matches!(method.as_str(), "POST" | "PUT" | "PATCH" | "DELETE");
    if !is_mutation {
        return next.run(request).await;
    }

    let started = Instant::now();
    let path = request.uri().path().to_owned();
    let user_id = request
        .extensions()
        .get::<AuthContext>()
        .and_then(|auth| auth.user.as_ref())
        .map(|user| user.user_id);

    // Buffer the body so both the handler and the audit record can read it.
    let (parts, body) = request.into_parts();
    let body_bytes = to_bytes(body, MAX_BODY_SIZE * 4).await.unwrap_or_default();
    let request_body: Option<Value> = if body_bytes.is_empty() {
        None
    } else if body_bytes.len() > MAX_BODY_SIZE {
        Some(serde_json::json!({
            "_truncated": format!("Body size {} exceeds limit", body_bytes.len())
        }))
    } else {
        serde_json::from_slice(&body_bytes).ok().or_else(|| {
            Some(serde_json::json!({
                "_raw": String::from_utf8_lossy(&body_bytes[..body_bytes.len().min(100)])
            }))
        })
    };
    let request = Request::from_parts(parts, Body::from(body_bytes));

    let response = next.run(request).await;

    if let Some(user_id) = user_id {
        let mut details = serde_json::json!({ "status_code": response.status().as_u16() });
        if let Some(body) = &request_body {
            details["request_body"] = truncate_body(body);
        }
        context.audit.publish(AuditRecord {
            id: Uuid::now_v7(),
            user_id,
            method: method.to_string(),
            path,
            status_code: response.status().as_u16(),
            details,
            occurred_at: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
        });
    }

    response
}
