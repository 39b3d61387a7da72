//! System-wide event types for decoupled service communication.
//!
//! Every event travels in an [`EventEnvelope`] carrying identity, type tag
//! and timestamp; the payload enum [`DomainEvent`] carries the correlation
//! key (scan_id, job_id, community_server_id, …) in its domain fields.
//! Delivery is at-least-once with per-subject ordering, so handlers must be
//! idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::constants::EVENT_SUBJECT_ROOT;

/// One message inside a bulk-scan batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkScanMessage {
    pub message_id: String,
    pub channel_id: String,
    pub author_id: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Per-message scores published in debug-mode progress events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageScores {
    pub message_id: String,
    pub moderation_flagged: bool,
    pub flashpoint_confidence: Option<f64>,
    pub similarity_top_score: Option<f64>,
}

/// A message flagged during a bulk scan, with the reasons it was flagged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlaggedMessage {
    pub message: BulkScanMessage,
    pub reasons: Vec<String>,
    pub scores: MessageScores,
}

/// Domain-level events services publish and subscribe to without direct
/// coupling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum DomainEvent {
    // === Vision events ===
    /// An image description was requested from the vision worker.
    #[serde(rename = "vision.description_requested")]
    VisionDescriptionRequested {
        request_id: Uuid,
        community_server_id: Uuid,
        image_url: String,
    },

    // === Bulk scan events ===
    /// A scan was initiated with its parameters.
    #[serde(rename = "bulk_scan.initiated")]
    BulkScanInitiated {
        scan_id: Uuid,
        community_server_id: Uuid,
        channel_ids: Vec<String>,
        window_days: u32,
    },
    /// The platform bot streamed one batch of historical messages.
    #[serde(rename = "bulk_scan.message_batch")]
    BulkScanMessageBatch {
        scan_id: Uuid,
        messages: Vec<BulkScanMessage>,
        batch_number: u32,
        is_final_batch: bool,
    },
    /// Scan finished; total message count.
    #[serde(rename = "bulk_scan.completed")]
    BulkScanCompleted {
        scan_id: Uuid,
        messages_scanned: u64,
    },
    /// Accumulated flagged messages for a finished scan.
    #[serde(rename = "bulk_scan.results")]
    BulkScanResults {
        scan_id: Uuid,
        flagged_messages: Vec<FlaggedMessage>,
    },
    /// Per-batch scores for every message; published only when the
    /// community has vibecheck debug mode enabled.
    #[serde(rename = "bulk_scan.progress")]
    BulkScanProgress {
        scan_id: Uuid,
        batch_number: u32,
        scores: Vec<MessageScores>,
    },

    // === Scoring events ===
    /// A note's score changed, or a batch scoring run is due.
    #[serde(rename = "note.score_updated")]
    NoteScoreUpdated {
        community_server_id: Uuid,
        note_id: Option<Uuid>,
        note_count: u64,
        batch_scoring: bool,
    },

    // === Audit events ===
    /// An audit record reached durable storage.
    #[serde(rename = "audit.log_persisted")]
    AuditLogPersisted {
        audit_id: Uuid,
        user_id: Uuid,
        path: String,
    },
}

impl DomainEvent {
    /// Stable type tag; also the trailing part of the bus subject.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::VisionDescriptionRequested { .. } => "vision.description_requested",
            Self::BulkScanInitiated { .. } => "bulk_scan.initiated",
            Self::BulkScanMessageBatch { .. } => "bulk_scan.message_batch",
            Self::BulkScanCompleted { .. } => "bulk_scan.completed",
            Self::BulkScanResults { .. } => "bulk_scan.results",
            Self::BulkScanProgress { .. } => "bulk_scan.progress",
            Self::NoteScoreUpdated { .. } => "note.score_updated",
            Self::AuditLogPersisted { .. } => "audit.log_persisted",
        }
    }

    /// Fully qualified bus subject, e.g. `OPENNOTES.bulk_scan.message_batch`.
    #[must_use]
    pub fn subject(&self) -> String {
        format!("{EVENT_SUBJECT_ROOT}.{}", self.event_type())
    }
}

/// Wire envelope for every published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: DomainEvent,
    /// Extension fields preserved across serialization round-trips.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra: Option<Value>,
}

impl EventEnvelope {
    #[must_use]
    pub fn new(event: DomainEvent) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            timestamp: Utc::now(),
            event,
            extra: None,
        }
    }

    /// Subject the envelope should be published on.
    #[must_use]
    pub fn subject(&self) -> String {
        self.event.subject()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subjects_are_rooted_and_stable() {
        let event = DomainEvent::BulkScanCompleted {
            scan_id: Uuid::now_v7(),
            messages_scanned: 42,
        };
        assert_eq!(event.subject(), "OPENNOTES.bulk_scan.completed");
    }

    #[test]
    fn envelope_serializes_event_type_tag() {
        let envelope = EventEnvelope::new(DomainEvent::NoteScoreUpdated {
            community_server_id: Uuid::now_v7(),
            note_id: None,
            note_count: 200,
            batch_scoring: true,
        });
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["event_type"], "note.score_updated");
        assert!(json["event_id"].is_string());
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn envelope_round_trips() {
        let envelope = EventEnvelope::new(DomainEvent::BulkScanMessageBatch {
            scan_id: Uuid::now_v7(),
            messages: vec![BulkScanMessage {
                message_id: "1".to_owned(),
                channel_id: "c".to_owned(),
                author_id: "a".to_owned(),
                content: "hello".to_owned(),
                timestamp: Utc::now(),
            }],
            batch_number: 3,
            is_final_batch: false,
        });
        let json = serde_json::to_string(&envelope).unwrap();
        let back: EventEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, envelope);
    }
}
