//! Previously-seen message entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// An archived platform message that already has a published note.
///
/// Indexed for per-community nearest-neighbor lookup so a new note request
/// on semantically identical content can short-circuit with the existing
/// note instead of re-entering scoring. Linked 1:N to chunks; the row-level
/// `embedding` is a legacy column kept for older records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviouslySeenMessage {
    pub id: Uuid,
    pub community_server_id: Uuid,
    /// Platform snowflake of the original message.
    pub original_message_id: String,
    pub published_note_id: Uuid,
    pub embedding: Option<Vec<f32>>,
    pub embedding_provider: Option<String>,
    pub embedding_model: Option<String>,
    pub extra_metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// A previously-seen match returned by the similarity lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviouslySeenMatch {
    pub message: PreviouslySeenMessage,
    /// Cosine distance of the closest linked chunk; lower is closer.
    pub distance: f64,
}
