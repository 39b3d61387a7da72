//! Outbound provider ports: embeddings, moderation, flashpoint detection,
//! and the note-scoring capability.

use async_trait::async_trait;
use uuid::Uuid;

use crate::entities::{Note, Rating};
use crate::error::Result;
use crate::events::BulkScanMessage;
use crate::value_objects::ScoredNote;

/// Embedding provider (one LLM call per text).
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text into the provider's vector space.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Provider name, e.g. `openai`.
    fn provider_name(&self) -> &str;

    /// Model identifier, e.g. `text-embedding-3-small`.
    fn model_name(&self) -> &str;

    /// Output dimensionality (1536 for the default stack).
    fn dimensions(&self) -> usize;
}

/// Moderation verdict for one message.
#[derive(Debug, Clone, PartialEq)]
pub struct ModerationVerdict {
    pub flagged: bool,
    pub categories: Vec<String>,
}

/// Content moderation provider.
#[async_trait]
pub trait ModerationProvider: Send + Sync {
    async fn moderate(&self, content: &str) -> Result<ModerationVerdict>;
}

/// Outcome of flashpoint detection on one message.
#[derive(Debug, Clone, PartialEq)]
pub struct FlashpointVerdict {
    pub will_derail: bool,
    pub confidence: f64,
    pub reasoning: String,
}

/// Detector for early conversational signals that a thread may derail.
///
/// Implementations load an optimized prompt artifact when available and
/// fall back to the base prompt otherwise. Transient provider errors are
/// swallowed by the caller (treated as "no flashpoint"); only critical
/// errors propagate.
#[async_trait]
pub trait FlashpointDetector: Send + Sync {
    async fn detect(
        &self,
        context: &[BulkScanMessage],
        message: &BulkScanMessage,
    ) -> Result<FlashpointVerdict>;
}

/// Materialized scoring inputs for a community.
///
/// The production implementation reads the primary database; test doubles
/// conforming to this protocol are interchangeable with it.
#[async_trait]
pub trait ScoringDataProvider: Send + Sync {
    async fn ratings_for_community(&self, community_server_id: Uuid) -> Result<Vec<Rating>>;

    async fn notes_for_community(&self, community_server_id: Uuid) -> Result<Vec<Note>>;

    async fn participant_ids_for_community(&self, community_server_id: Uuid) -> Result<Vec<String>>;
}

/// The matrix-factorization scoring callable.
///
/// The algorithm itself is external; this port treats it as a callable
/// that returns per-note scores or raises, in which case the adapter falls
/// back to the deterministic stub.
#[async_trait]
pub trait NoteScorer: Send + Sync {
    /// Name matching the tier configuration entries, e.g. `MFCoreScorer`.
    fn name(&self) -> &str;

    async fn score(&self, notes: &[Note], ratings: &[Rating]) -> Result<Vec<ScoredNote>>;
}
