//! Hybrid search value objects.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A hybrid search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    /// Dataset tag filter; empty means no filter.
    #[serde(default)]
    pub dataset_tags: Vec<String>,
    pub top_k: usize,
}

/// One result row from the hybrid search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: Uuid,
    pub chunk_text: String,
    /// Normalized semantic score in [0, 1].
    pub semantic_score: f64,
    /// Normalized keyword score in [0, 1].
    pub keyword_score: f64,
    /// Convex combination of the two under the resolved alpha.
    pub final_score: f64,
    /// Fact-check items this chunk is linked to.
    pub source_ids: Vec<Uuid>,
}

/// Structured analytics record emitted per search.
///
/// The query itself is never stored; only a SHA-256 prefix for correlation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchAnalyticsRecord {
    pub query_hash: String,
    pub alpha: f64,
    pub dataset_tags: Vec<String>,
    pub result_count: usize,
    pub top_score: Option<f64>,
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
    pub score_spread: Option<f64>,
    pub duration_ms: u64,
}
