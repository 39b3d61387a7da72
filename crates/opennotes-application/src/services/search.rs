//! Hybrid search: vector similarity and full-text rank fused by Convex
//! Combination under a dynamically configured alpha.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use opennotes_domain::constants::FALLBACK_ALPHA;
use opennotes_domain::entities::Chunk;
use opennotes_domain::error::Result;
use opennotes_domain::ports::{CacheProvider, ChunkRepository};
use opennotes_domain::value_objects::{
    FusionAlpha, SearchAnalyticsRecord, SearchHit, SearchRequest, fusion_alpha_key,
};

use super::embedding::EmbeddingPipeline;

/// Candidate depth for each leg before fusion.
const VECTOR_CANDIDATES: i64 = 50;
const KEYWORD_CANDIDATES: i64 = 50;

/// Cache key for aggregate analytics counters.
const ANALYTICS_STATS_KEY: &str = "search:analytics:stats";

/// Hybrid search over the chunk index.
pub struct HybridSearchService {
    chunks: Arc<dyn ChunkRepository>,
    cache: Arc<dyn CacheProvider>,
    embeddings: Arc<EmbeddingPipeline>,
}

impl HybridSearchService {
    #[must_use]
    pub fn new(
        chunks: Arc<dyn ChunkRepository>,
        cache: Arc<dyn CacheProvider>,
        embeddings: Arc<EmbeddingPipeline>,
    ) -> Self {
        Self {
            chunks,
            cache,
            embeddings,
        }
    }

    /// Resolve the fusion alpha for an optional dataset.
    ///
    /// Priority: dataset override key → default key → hard fallback 0.7.
    /// Self-healing: cache misses and invalid cached values write the
    /// fallback back so subsequent reads are cached.
    pub async fn resolve_alpha(&self, dataset: Option<&str>) -> FusionAlpha {
        if let Some(dataset) = dataset {
            if let Some(alpha) = self.read_alpha_key(&fusion_alpha_key(Some(dataset)), false).await
            {
                return alpha;
            }
        }
        if let Some(alpha) = self.read_alpha_key(&fusion_alpha_key(None), true).await {
            return alpha;
        }
        FusionAlpha::new(FALLBACK_ALPHA).expect("FALLBACK_ALPHA is a valid in-range constant")
    }

    /// Read one alpha key. `self_heal` restores the fallback on miss (used
    /// for the default key only; a missing dataset override simply defers).
    async fn read_alpha_key(&self, key: &str, self_heal: bool) -> Option<FusionAlpha> {
        match self.cache.get(key).await {
            Ok(Some(raw)) => match FusionAlpha::parse(&raw) {
                Ok(alpha) => Some(alpha),
                Err(_) => {
                    warn!(key, raw, "Invalid alpha value in cache, restoring fallback");
                    self.write_fallback(key).await;
                    Some(FusionAlpha::new(FALLBACK_ALPHA).ok()?)
                }
            },
            Ok(None) => {
                if self_heal {
                    info!(key, fallback = FALLBACK_ALPHA, "Alpha cache miss, restoring fallback");
                    self.write_fallback(key).await;
                    Some(FusionAlpha::new(FALLBACK_ALPHA).ok()?)
                } else {
                    None
                }
            }
            Err(e) => {
                warn!(key, error = %e, "Cache error reading alpha, using fallback");
                Some(FusionAlpha::new(FALLBACK_ALPHA).ok()?)
            }
        }
    }

    async fn write_fallback(&self, key: &str) {
        if let Err(e) = self.cache.set(key, &FALLBACK_ALPHA.to_string(), None).await {
            warn!(key, error = %e, "Failed to self-heal alpha key");
        }
    }

    /// Set an alpha (dataset override or the default).
    pub async fn set_alpha(&self, alpha: FusionAlpha, dataset: Option<&str>) -> Result<()> {
        let key = fusion_alpha_key(dataset);
        self.cache.set(&key, &alpha.value().to_string(), None).await?;
        info!(key, alpha = alpha.value(), "Fusion alpha updated");
        Ok(())
    }

    /// Delete a dataset override; returns whether one existed.
    pub async fn delete_alpha(&self, dataset: &str) -> Result<bool> {
        self.cache.delete(&fusion_alpha_key(Some(dataset))).await
    }

    /// All configured alphas: the default plus dataset overrides.
    pub async fn get_all_alphas(&self) -> Result<(f64, HashMap<String, f64>)> {
        let default = self.resolve_alpha(None).await.value();
        let mut overrides = HashMap::new();
        let keys = self
            .cache
            .keys(&format!(
                "{}*",
                opennotes_domain::constants::DATASET_ALPHA_KEY_PREFIX
            ))
            .await?;
        let values = self.cache.mget(&keys).await?;
        for (key, value) in keys.into_iter().zip(values) {
            let dataset = key
                .strip_prefix(opennotes_domain::constants::DATASET_ALPHA_KEY_PREFIX)
                .unwrap_or(&key)
                .to_owned();
            if let Some(raw) = value {
                if let Ok(alpha) = FusionAlpha::parse(&raw) {
                    overrides.insert(dataset, alpha.value());
                }
            }
        }
        Ok((default, overrides))
    }

    /// Run a hybrid search. The first dataset tag (if any) selects the
    /// alpha override.
    pub async fn search(&self, request: &SearchRequest, workflow_id: &str) -> Result<Vec<SearchHit>> {
        let started = Instant::now();
        let alpha = self
            .resolve_alpha(request.dataset_tags.first().map(String::as_str))
            .await;

        let query_embedding = self.embeddings.embed(&request.query, workflow_id).await?;

        let vector = self
            .chunks
            .vector_search(&query_embedding, &request.dataset_tags, VECTOR_CANDIDATES)
            .await?;
        let keyword = self
            .chunks
            .keyword_search(&request.query, &request.dataset_tags, KEYWORD_CANDIDATES)
            .await?;

        let hits = fuse(alpha, vector, keyword, request.top_k);
        self.log_analytics(request, alpha, &hits, started).await;
        Ok(hits)
    }

    /// Emit the analytics record and bump aggregate counters. Never fails
    /// the search.
    async fn log_analytics(
        &self,
        request: &SearchRequest,
        alpha: FusionAlpha,
        hits: &[SearchHit],
        started: Instant,
    ) {
        let scores: Vec<f64> = hits.iter().map(|h| h.final_score).collect();
        let min = scores.iter().copied().fold(None, |acc: Option<f64>, s| {
            Some(acc.map_or(s, |a| a.min(s)))
        });
        let max = scores.iter().copied().fold(None, |acc: Option<f64>, s| {
            Some(acc.map_or(s, |a| a.max(s)))
        });

        let record = SearchAnalyticsRecord {
            query_hash: query_hash(&request.query),
            alpha: alpha.value(),
            dataset_tags: request.dataset_tags.clone(),
            result_count: hits.len(),
            top_score: scores.first().copied(),
            min_score: min,
            max_score: max,
            score_spread: match (min, max) {
                (Some(min), Some(max)) => Some(max - min),
                _ => None,
            },
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            query_hash = record.query_hash,
            alpha = record.alpha,
            result_count = record.result_count,
            duration_ms = record.duration_ms,
            "search_analytics"
        );

        let counters: Result<()> = async {
            self.cache.hincrby(ANALYTICS_STATS_KEY, "total_searches", 1).await?;
            self.cache
                .hincrby(ANALYTICS_STATS_KEY, "total_results", hits.len() as i64)
                .await?;
            let alpha_bucket = format!("alpha:{:.1}", alpha.value());
            self.cache.hincrby(ANALYTICS_STATS_KEY, &alpha_bucket, 1).await?;
            Ok(())
        }
        .await;
        if let Err(e) = counters {
            warn!(error = %e, "Failed to update search analytics counters");
        }
    }
}

/// SHA-256 prefix of the query, for correlation without storing text.
#[must_use]
pub fn query_hash(query: &str) -> String {
    let digest = Sha256::digest(query.as_bytes());
    hex::encode(&digest[..8])
}

/// Min-max normalize a score list to [0, 1]. A degenerate candidate set
/// (all scores equal) normalizes to 1.0.
fn min_max_normalize(scores: &[f64]) -> Vec<f64> {
    let Some(min) = scores.iter().copied().reduce(f64::min) else {
        return Vec::new();
    };
    let max = scores.iter().copied().fold(min, f64::max);
    let range = max - min;
    scores
        .iter()
        .map(|s| if range > 0.0 { (s - min) / range } else { 1.0 })
        .collect()
}

/// Fuse the two candidate lists under the convex combination, returning the
/// top-k distinct chunks sorted non-increasingly by final score.
fn fuse(
    alpha: FusionAlpha,
    vector: Vec<(Chunk, f64, Vec<Uuid>)>,
    keyword: Vec<(Chunk, f64, Vec<Uuid>)>,
    top_k: usize,
) -> Vec<SearchHit> {
    // Cosine distance → similarity before normalization.
    let vector_scores: Vec<f64> = vector.iter().map(|(_, d, _)| 1.0 - d).collect();
    let keyword_scores: Vec<f64> = keyword.iter().map(|(_, r, _)| *r).collect();
    let vector_norm = min_max_normalize(&vector_scores);
    let keyword_norm = min_max_normalize(&keyword_scores);

    struct Candidate {
        chunk: Chunk,
        semantic: f64,
        keyword: f64,
        source_ids: Vec<Uuid>,
    }

    let mut by_id: HashMap<Uuid, Candidate> = HashMap::new();
    for ((chunk, _, sources), norm) in vector.into_iter().zip(vector_norm) {
        by_id.insert(
            chunk.id,
            Candidate {
                chunk,
                semantic: norm,
                keyword: 0.0,
                source_ids: sources,
            },
        );
    }
    for ((chunk, _, sources), norm) in keyword.into_iter().zip(keyword_norm) {
        by_id
            .entry(chunk.id)
            .and_modify(|c| c.keyword = norm)
            .or_insert(Candidate {
                chunk,
                semantic: 0.0,
                keyword: norm,
                source_ids: sources,
            });
    }

    let mut hits: Vec<SearchHit> = by_id
        .into_values()
        .map(|c| SearchHit {
            chunk_id: c.chunk.id,
            chunk_text: c.chunk.chunk_text,
            semantic_score: c.semantic,
            keyword_score: c.keyword,
            final_score: alpha.combine(c.semantic, c.keyword),
            source_ids: c.source_ids,
        })
        .collect();
    hits.sort_by(|a, b| {
        b.final_score
            .partial_cmp(&a.final_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(top_k);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(text: &str) -> Chunk {
        Chunk::from_text(text)
    }

    #[test]
    fn normalization_maps_to_unit_interval() {
        let normed = min_max_normalize(&[1.0, 3.0, 5.0]);
        assert_eq!(normed, vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn degenerate_candidate_set_normalizes_to_one() {
        assert_eq!(min_max_normalize(&[2.0, 2.0]), vec![1.0, 1.0]);
        assert!(min_max_normalize(&[]).is_empty());
    }

    #[test]
    fn fusion_orders_by_convex_combination() {
        let alpha = FusionAlpha::new(0.7).unwrap();
        let semantic_best = chunk("semantic best");
        let keyword_best = chunk("keyword best");
        let vector = vec![
            (semantic_best.clone(), 0.1, vec![]),
            (keyword_best.clone(), 0.9, vec![]),
        ];
        let keyword = vec![
            (keyword_best.clone(), 10.0, vec![]),
            (semantic_best.clone(), 1.0, vec![]),
        ];
        let hits = fuse(alpha, vector, keyword, 10);
        assert_eq!(hits.len(), 2);
        // alpha = 0.7 weights the semantic leg: 0.7*1.0 beats 0.3*1.0.
        assert_eq!(hits[0].chunk_id, semantic_best.id);
        assert!(hits[0].final_score >= hits[1].final_score);
    }

    #[test]
    fn low_alpha_prefers_keyword_leg() {
        let alpha = FusionAlpha::new(0.1).unwrap();
        let semantic_best = chunk("semantic best");
        let keyword_best = chunk("keyword best");
        let vector = vec![
            (semantic_best.clone(), 0.1, vec![]),
            (keyword_best.clone(), 0.9, vec![]),
        ];
        let keyword = vec![
            (keyword_best.clone(), 10.0, vec![]),
            (semantic_best.clone(), 1.0, vec![]),
        ];
        let hits = fuse(alpha, vector, keyword, 10);
        assert_eq!(hits[0].chunk_id, keyword_best.id);
    }

    #[test]
    fn fusion_deduplicates_chunks_and_truncates() {
        let alpha = FusionAlpha::new(0.5).unwrap();
        let shared = chunk("shared");
        let only_vec = chunk("vector only");
        let vector = vec![
            (shared.clone(), 0.2, vec![]),
            (only_vec.clone(), 0.4, vec![]),
        ];
        let keyword = vec![(shared.clone(), 3.0, vec![])];
        let hits = fuse(alpha, vector, keyword, 1);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, shared.id);
    }

    #[test]
    fn query_hash_is_a_stable_prefix() {
        assert_eq!(query_hash("abc"), query_hash("abc"));
        assert_eq!(query_hash("abc").len(), 16);
        assert_ne!(query_hash("abc"), query_hash("abd"));
    }

    #[test]
    fn results_sorted_non_increasingly_for_any_alpha() {
        for raw in [0.0, 0.3, 0.7, 1.0] {
            let alpha = FusionAlpha::new(raw).unwrap();
            let vector = vec![
                (chunk("a"), 0.1, vec![]),
                (chunk("b"), 0.5, vec![]),
                (chunk("c"), 0.9, vec![]),
            ];
            let keyword = vec![
                (chunk("d"), 5.0, vec![]),
                (chunk("e"), 2.0, vec![]),
            ];
            let hits = fuse(alpha, vector, keyword, 10);
            for pair in hits.windows(2) {
                assert!(pair[0].final_score >= pair[1].final_score);
            }
        }
    }
}
