//! Note, rating and request entities as consumed by the scoring subsystem.
//!
//! Only the fields scoring needs are modeled here; the full CRUD surface for
//! these tables lives outside the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A community note under scoring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub author_participant_id: String,
    pub community_server_id: Uuid,
    pub classification: Option<String>,
    pub status: Option<String>,
    pub helpfulness_score: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// A helpfulness rating on a note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rating {
    pub id: Uuid,
    pub note_id: Uuid,
    pub rater_participant_id: String,
    /// helpful / somewhat_helpful / not_helpful
    pub helpfulness_level: String,
    pub created_at: DateTime<Utc>,
}

/// Status of a note request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Fulfilled,
    Dismissed,
}

/// A note request raised on a piece of content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: Uuid,
    pub request_id: String,
    pub requested_by: String,
    pub community_server_id: Uuid,
    pub message_archive_id: Option<Uuid>,
    pub status: RequestStatus,
    pub note_id: Option<Uuid>,
}
