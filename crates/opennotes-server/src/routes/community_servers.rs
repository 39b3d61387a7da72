//! Community server admin endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{patch, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use opennotes_application::workflow::EnqueueOptions;
use opennotes_domain::error::Error;

use crate::error::ApiResult;
use crate::jsonapi::Document;
use crate::middleware::AuthContext;
use crate::state::AppContext;

pub fn router() -> Router<AppContext> {
    Router::new()
        .route(
            "/community-servers/{platform_id}/welcome-message",
            patch(set_welcome_message),
        )
        .route("/community-servers/{platform_id}/score", post(trigger_scoring))
}

/// The welcome-message PATCH distinguishes "field omitted" from
/// "field = null": an omitted field is a validation error, an explicit
/// null clears the stored message.
#[derive(Debug, Deserialize)]
struct WelcomeMessageRequest {
    // Outer Option: field presence. Inner Option: null vs string.
    #[serde(default, deserialize_with = "deserialize_present")]
    welcome_message: Option<Option<String>>,
}

fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Some(Option::<String>::deserialize(deserializer)?))
}

#[derive(Debug, Serialize)]
struct WelcomeMessageAttributes {
    platform_community_server_id: String,
    welcome_message: Option<String>,
}

/// Service accounts only; PATCH with null clears the value.
async fn set_welcome_message(
    State(context): State<AppContext>,
    Path(platform_id): Path<String>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<WelcomeMessageRequest>,
) -> ApiResult<Document<WelcomeMessageAttributes>> {
    if !auth.is_service_account() {
        return Err(Error::forbidden("Service account required").into());
    }
    let Some(welcome_message) = body.welcome_message else {
        return Err(Error::validation("welcome_message field is required").into());
    };

    let community = context
        .communities
        .get_by_platform_id(&platform_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("community server {platform_id}")))?;

    context
        .communities
        .set_welcome_message(community.id, welcome_message.clone())
        .await?;

    Ok(Document::new(
        "community-servers",
        community.id,
        WelcomeMessageAttributes {
            platform_community_server_id: platform_id,
            welcome_message,
        },
    ))
}

#[derive(Debug, Serialize)]
struct ScoringRunAttributes {
    workflow_id: String,
    community_server_id: String,
}

/// 202 with the workflow id; 409 when a scoring run is already in progress.
async fn trigger_scoring(
    State(context): State<AppContext>,
    Path(platform_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let community = context
        .communities
        .get_by_platform_id(&platform_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("community server {platform_id}")))?;

    let workflow_id = uuid::Uuid::now_v7().to_string();
    let owner = context
        .engine
        .enqueue(
            EnqueueOptions {
                queue_name: "scoring".to_owned(),
                workflow_name: "score_community".to_owned(),
                workflow_id: Some(workflow_id.clone()),
                deduplication_id: Some(format!("score:{}", community.id)),
            },
            Some(Value::String(community.id.to_string())),
        )
        .await?;

    if owner != workflow_id {
        return Err(Error::conflict(format!(
            "Scoring already in progress for this community (workflow {owner})"
        ))
        .into());
    }

    Ok((
        StatusCode::ACCEPTED,
        Document::new(
            "scoring-runs",
            workflow_id.clone(),
            ScoringRunAttributes {
                workflow_id,
                community_server_id: community.id.to_string(),
            },
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn omitted_field_reads_as_absent() {
        let body: WelcomeMessageRequest = serde_json::from_str("{}").unwrap();
        assert!(body.welcome_message.is_none());
    }

    #[test]
    fn explicit_null_reads_as_present_null() {
        let body: WelcomeMessageRequest =
            serde_json::from_str(r#"{"welcome_message": null}"#).unwrap();
        assert_eq!(body.welcome_message, Some(None));
    }

    #[test]
    fn string_reads_as_present_value() {
        let body: WelcomeMessageRequest =
            serde_json::from_str(r#"{"welcome_message": "hi"}"#).unwrap();
        assert_eq!(body.welcome_message, Some(Some("hi".to_owned())));
    }
}
