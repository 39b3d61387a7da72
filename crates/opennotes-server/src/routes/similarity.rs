//! Previously-seen similarity search.
//!
//! Consulted before a new note request is spawned: a close-enough match
//! short-circuits with the already-published note.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use opennotes_domain::error::Error;

use crate::error::ApiResult;
use crate::jsonapi::Document;
use crate::state::AppContext;

pub fn router() -> Router<AppContext> {
    Router::new().route("/similarity-searches", post(search))
}

#[derive(Debug, Deserialize)]
struct SimilaritySearchRequest {
    content: String,
    community_server_id: Uuid,
    #[serde(default = "default_top_k")]
    top_k: usize,
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Serialize)]
struct SimilarityMatch {
    message_id: Uuid,
    original_message_id: String,
    published_note_id: Uuid,
    distance: f64,
}

#[derive(Debug, Serialize)]
struct SimilaritySearchAttributes {
    community_server_id: Uuid,
    matches: Vec<SimilarityMatch>,
}

async fn search(
    State(context): State<AppContext>,
    Json(body): Json<SimilaritySearchRequest>,
) -> ApiResult<Document<SimilaritySearchAttributes>> {
    if body.content.trim().is_empty() {
        return Err(Error::validation("content must not be empty").into());
    }

    let search_id = Uuid::now_v7();
    let matches = context
        .similarity
        .find_similar(
            &body.content,
            body.community_server_id,
            body.top_k.clamp(1, 50),
            &format!("similarity:{search_id}"),
        )
        .await?;

    Ok(Document::new(
        "similarity-searches",
        search_id,
        SimilaritySearchAttributes {
            community_server_id: body.community_server_id,
            matches: matches
                .into_iter()
                .map(|m| SimilarityMatch {
                    message_id: m.message.id,
                    original_message_id: m.message.original_message_id,
                    published_note_id: m.message.published_note_id,
                    distance: m.distance,
                })
                .collect(),
        },
    ))
}
