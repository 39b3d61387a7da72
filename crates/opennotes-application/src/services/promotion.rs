//! Candidate promotion into the searchable fact-check table.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use opennotes_domain::entities::{CandidateStatus, FactCheckItem};
use opennotes_domain::error::Result;
use opennotes_domain::ports::FactCheckRepository;

/// Promotes verified candidates from `fact_checked_item_candidates` to the
/// main `fact_check_items` table.
pub struct PromotionService {
    fact_checks: Arc<dyn FactCheckRepository>,
}

impl PromotionService {
    #[must_use]
    pub fn new(fact_checks: Arc<dyn FactCheckRepository>) -> Self {
        Self { fact_checks }
    }

    /// Promote one candidate. Returns whether it is promoted afterwards.
    ///
    /// Idempotent: an already-PROMOTED candidate is immediate success, and
    /// a candidate stuck in PROMOTING (crash mid-promotion) retries without
    /// waiting for any recovery timeout. The item lands in
    /// `fact_check_items` exactly once thanks to the natural-key conflict
    /// target.
    pub async fn promote_candidate(&self, candidate_id: Uuid) -> Result<bool> {
        let Some(candidate) = self.fact_checks.get_candidate(candidate_id).await? else {
            warn!(candidate_id = %candidate_id, "Candidate not found for promotion");
            return Ok(false);
        };

        if candidate.status == CandidateStatus::Promoted {
            info!(candidate_id = %candidate_id, "Candidate already promoted");
            return Ok(true);
        }

        if let Some(reason) = candidate.promotion_blocker() {
            warn!(candidate_id = %candidate_id, reason, "Refusing promotion");
            return Ok(false);
        }

        self.fact_checks
            .update_candidate_status(candidate_id, CandidateStatus::Promoting, None)
            .await?;

        let item = FactCheckItem {
            id: Uuid::now_v7(),
            source_url: candidate.source_url.clone(),
            claim_hash: candidate.claim_hash.clone(),
            title: candidate.title.clone(),
            content: candidate.content.clone().unwrap_or_default(),
            summary: candidate.summary.clone(),
            rating: candidate.rating.clone().unwrap_or_default(),
            dataset_name: candidate.dataset_name.clone(),
            dataset_tags: candidate.dataset_tags.clone(),
            published_date: candidate.published_date,
            created_at: chrono::Utc::now(),
        };
        self.fact_checks.insert_item(&item).await?;

        self.fact_checks
            .update_candidate_status(candidate_id, CandidateStatus::Promoted, None)
            .await?;
        info!(candidate_id = %candidate_id, "Candidate promoted");
        Ok(true)
    }
}
