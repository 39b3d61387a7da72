//! Fact-check candidate and promoted item entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Status of an imported fact-check candidate.
///
/// pending → scraping → {scraped, scrape_failed}; scraped → promoting →
/// promoted. PROMOTING may be re-entered after a crash so promotion retries
/// idempotently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateStatus {
    Pending,
    Scraping,
    Scraped,
    ScrapeFailed,
    Promoting,
    Promoted,
}

impl CandidateStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scraping => "scraping",
            Self::Scraped => "scraped",
            Self::ScrapeFailed => "scrape_failed",
            Self::Promoting => "promoting",
            Self::Promoted => "promoted",
        }
    }
}

impl std::str::FromStr for CandidateStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "scraping" => Ok(Self::Scraping),
            "scraped" => Ok(Self::Scraped),
            "scrape_failed" => Ok(Self::ScrapeFailed),
            "promoting" => Ok(Self::Promoting),
            "promoted" => Ok(Self::Promoted),
            _ => Err(format!("Unknown candidate status: {s}")),
        }
    }
}

/// Raw imported fact-check row, pre-promotion.
///
/// One article can cover many claims; each claim is its own row, so the
/// natural key is (source_url, claim_hash, dataset_name).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactCheckCandidate {
    pub id: Uuid,
    pub source_url: String,
    /// xxh3-64 hex of the normalized claim text.
    pub claim_hash: String,
    pub title: String,
    pub content: Option<String>,
    pub summary: Option<String>,
    /// Set only by human approval; promotion requires it.
    pub rating: Option<String>,
    pub rating_details: Option<String>,
    /// Model-suggested rating probabilities; never sufficient for promotion.
    pub predicted_ratings: BTreeMap<String, f64>,
    pub published_date: Option<DateTime<Utc>>,
    pub dataset_name: String,
    pub dataset_tags: Vec<String>,
    pub original_id: Option<String>,
    pub extracted_data: Option<Value>,
    pub status: CandidateStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FactCheckCandidate {
    /// Validate readiness for promotion.
    ///
    /// Accepts SCRAPED or PROMOTING (the latter enables idempotent retry
    /// after a crash mid-promotion). Requires non-empty content and a
    /// human-approved rating.
    ///
    /// Returns `None` when valid, otherwise the reason promotion is refused.
    #[must_use]
    pub fn promotion_blocker(&self) -> Option<String> {
        if self.content.as_deref().is_none_or(str::is_empty) {
            return Some(format!("Cannot promote candidate without content: {}", self.id));
        }
        if self.rating.is_none() {
            return Some(format!(
                "Cannot promote candidate without human-approved rating: {}",
                self.id
            ));
        }
        if !matches!(self.status, CandidateStatus::Scraped | CandidateStatus::Promoting) {
            return Some(format!(
                "Cannot promote candidate with status {}: {}",
                self.status.as_str(),
                self.id
            ));
        }
        None
    }
}

/// Promoted, searchable fact-check item. Linked 1:N to chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactCheckItem {
    pub id: Uuid,
    pub source_url: String,
    pub claim_hash: String,
    pub title: String,
    pub content: String,
    pub summary: Option<String>,
    pub rating: String,
    pub dataset_name: String,
    pub dataset_tags: Vec<String>,
    pub published_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(status: CandidateStatus, content: Option<&str>, rating: Option<&str>) -> FactCheckCandidate {
        FactCheckCandidate {
            id: Uuid::now_v7(),
            source_url: "https://example.org/check".to_owned(),
            claim_hash: "abcd".to_owned(),
            title: "t".to_owned(),
            content: content.map(ToOwned::to_owned),
            summary: None,
            rating: rating.map(ToOwned::to_owned),
            rating_details: None,
            predicted_ratings: BTreeMap::new(),
            published_date: None,
            dataset_name: "snopes".to_owned(),
            dataset_tags: vec!["snopes".to_owned()],
            original_id: None,
            extracted_data: None,
            status,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn scraped_with_content_and_rating_is_promotable() {
        let c = candidate(CandidateStatus::Scraped, Some("body"), Some("false"));
        assert!(c.promotion_blocker().is_none());
    }

    #[test]
    fn promoting_is_promotable_for_retry() {
        let c = candidate(CandidateStatus::Promoting, Some("body"), Some("false"));
        assert!(c.promotion_blocker().is_none());
    }

    #[test]
    fn missing_content_blocks_promotion() {
        let c = candidate(CandidateStatus::Scraped, None, Some("false"));
        assert!(c.promotion_blocker().is_some());
        let c = candidate(CandidateStatus::Scraped, Some(""), Some("false"));
        assert!(c.promotion_blocker().is_some());
    }

    #[test]
    fn missing_rating_blocks_promotion() {
        let c = candidate(CandidateStatus::Scraped, Some("body"), None);
        assert!(c.promotion_blocker().unwrap().contains("rating"));
    }

    #[test]
    fn pending_blocks_promotion() {
        let c = candidate(CandidateStatus::Pending, Some("body"), Some("false"));
        assert!(c.promotion_blocker().unwrap().contains("pending"));
    }
}
