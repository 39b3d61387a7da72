//! Chunk entities for the hybrid-search index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_64;

/// Deduplication hash for chunk text: xxh3-64, fixed-width lowercase hex.
#[must_use]
pub fn chunk_text_hash(text: &str) -> String {
    format!("{:016x}", xxh3_64(text.as_bytes()))
}

/// A unique, deduplicated text fragment with an optional embedding.
///
/// `chunk_text_hash` is derived from `chunk_text` and UNIQUE across the
/// table. The `search_vector` column is maintained by a database trigger;
/// it never appears on this struct.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: Uuid,
    pub chunk_text: String,
    pub chunk_text_hash: String,
    /// 1536-dim vector; absent until the embedding backfill task runs.
    pub embedding: Option<Vec<f32>>,
    pub embedding_provider: Option<String>,
    pub embedding_model: Option<String>,
    pub is_common: bool,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    /// Build a chunk from raw text, deriving the dedup hash.
    #[must_use]
    pub fn from_text(text: impl Into<String>) -> Self {
        let chunk_text = text.into();
        let chunk_text_hash = chunk_text_hash(&chunk_text);
        Self {
            id: Uuid::now_v7(),
            chunk_text,
            chunk_text_hash,
            embedding: None,
            embedding_provider: None,
            embedding_model: None,
            is_common: false,
            created_at: Utc::now(),
        }
    }
}

/// Kind of source entity a chunk can be linked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkSourceKind {
    FactCheck,
    PreviouslySeen,
}

impl ChunkSourceKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FactCheck => "fact_check",
            Self::PreviouslySeen => "previously_seen",
        }
    }
}

impl std::str::FromStr for ChunkSourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "fact_check" => Ok(Self::FactCheck),
            "previously_seen" => Ok(Self::PreviouslySeen),
            _ => Err(format!("Unknown chunk source kind: {s}")),
        }
    }
}

/// Link from a chunk to a source entity, with the chunk's 0-based position
/// within that source. Unique on (chunk_id, source_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkLink {
    pub chunk_id: Uuid,
    pub source_id: Uuid,
    pub chunk_index: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_hex() {
        let h1 = chunk_text_hash("the claim is false");
        let h2 = chunk_text_hash("the claim is false");
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 16);
        assert!(h1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn different_text_different_hash() {
        assert_ne!(chunk_text_hash("a"), chunk_text_hash("b"));
    }

    #[test]
    fn from_text_derives_hash() {
        let chunk = Chunk::from_text("water is wet");
        assert_eq!(chunk.chunk_text_hash, chunk_text_hash("water is wet"));
        assert!(chunk.embedding.is_none());
    }
}
