//! Previously-seen similarity lookup.
//!
//! Per-community nearest-neighbor search over chunk embeddings linked to
//! archived published messages. Consulted before spawning a new note
//! request so semantically identical content short-circuits with the
//! already-published note.

use itertools::Itertools;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use opennotes_domain::entities::PreviouslySeenMatch;
use opennotes_domain::error::Result;
use opennotes_domain::ports::{ChunkRepository, PreviouslySeenRepository};

use super::embedding::EmbeddingPipeline;

/// Nearest-neighbor lookup over previously-seen messages.
pub struct SimilarityService {
    chunks: Arc<dyn ChunkRepository>,
    previously_seen: Arc<dyn PreviouslySeenRepository>,
    embeddings: Arc<EmbeddingPipeline>,
}

impl SimilarityService {
    #[must_use]
    pub fn new(
        chunks: Arc<dyn ChunkRepository>,
        previously_seen: Arc<dyn PreviouslySeenRepository>,
        embeddings: Arc<EmbeddingPipeline>,
    ) -> Self {
        Self {
            chunks,
            previously_seen,
            embeddings,
        }
    }

    /// Find the `top_k` closest previously-seen messages in a community.
    ///
    /// Distances are cosine distances of the closest linked chunk; results
    /// are sorted closest first.
    pub async fn find_similar(
        &self,
        text: &str,
        community_server_id: Uuid,
        top_k: usize,
        workflow_id: &str,
    ) -> Result<Vec<PreviouslySeenMatch>> {
        let embedding = self.embeddings.embed(text, workflow_id).await?;

        // Over-fetch: several chunks can link to one message.
        let neighbors = self
            .chunks
            .nearest_previously_seen(&embedding, community_server_id, (top_k * 4) as i64)
            .await?;

        // Keep the closest chunk distance per message.
        let best_per_message: Vec<(Uuid, f64)> = neighbors
            .into_iter()
            .into_group_map_by(|(message_id, _)| *message_id)
            .into_iter()
            .map(|(message_id, hits)| {
                let best = hits
                    .into_iter()
                    .map(|(_, d)| d)
                    .fold(f64::INFINITY, f64::min);
                (message_id, best)
            })
            .sorted_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .take(top_k)
            .collect();

        let ids: Vec<Uuid> = best_per_message.iter().map(|(id, _)| *id).collect();
        let messages = self.previously_seen.get_many(&ids).await?;
        debug!(
            community_server_id = %community_server_id,
            candidates = messages.len(),
            "Previously-seen lookup"
        );

        let matches = best_per_message
            .into_iter()
            .filter_map(|(id, distance)| {
                messages
                    .iter()
                    .find(|m| m.id == id)
                    .cloned()
                    .map(|message| PreviouslySeenMatch { message, distance })
            })
            .collect();
        Ok(matches)
    }
}
