//! Direct scoring endpoint.

use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use opennotes_domain::entities::{Note, Rating};
use opennotes_domain::error::Error;
use opennotes_domain::value_objects::ScoredNote;

use crate::error::ApiResult;
use crate::jsonapi::Document;
use crate::state::AppContext;

pub fn router() -> Router<AppContext> {
    Router::new().route("/scoring/score", post(score))
}

#[derive(Debug, Deserialize)]
struct ScoreRequest {
    notes: Vec<Note>,
    ratings: Vec<Rating>,
    /// Participant enrollment; accepted for wire compatibility.
    #[serde(default)]
    enrollment: Vec<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct ScoreAttributes {
    scores: Vec<ScoredNote>,
    note_count: usize,
    rating_count: usize,
    enrollment_count: usize,
}

async fn score(
    State(context): State<AppContext>,
    Json(body): Json<ScoreRequest>,
) -> ApiResult<Document<ScoreAttributes>> {
    if body.notes.is_empty() || body.ratings.is_empty() {
        return Err(Error::validation("notes and ratings must be non-empty").into());
    }

    let scores = context.scoring.score_notes(&body.notes, &body.ratings).await?;
    Ok(Document::new(
        "scoring-results",
        Uuid::now_v7(),
        ScoreAttributes {
            note_count: body.notes.len(),
            rating_count: body.ratings.len(),
            enrollment_count: body.enrollment.len(),
            scores,
        },
    ))
}
