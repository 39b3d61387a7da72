//! Scoring result value objects.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provenance and quality metadata attached to a score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreMetadata {
    /// Which scorer produced the value, e.g. `MFCoreScorer` or `batch_stub`.
    pub source: String,
    /// True when the MF scorer failed and a deterministic stub was used.
    #[serde(default)]
    pub degraded: bool,
    /// Low-volume tiers attach a confidence warning.
    #[serde(default)]
    pub confidence_warning: bool,
}

/// One scored note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredNote {
    pub note_id: Uuid,
    pub score: f64,
    pub confidence_level: String,
    pub metadata: ScoreMetadata,
}

/// Result of one scoring run over a community.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringOutcome {
    pub community_server_id: Uuid,
    pub tier: super::ScoringTier,
    pub note_count: u64,
    pub scores: Vec<ScoredNote>,
}
