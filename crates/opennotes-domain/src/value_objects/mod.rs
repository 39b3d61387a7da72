//! Value objects shared across layers.

pub mod fusion;
pub mod rate_limit;
pub mod scoring;
pub mod search;
pub mod tier;

pub use fusion::{FusionAlpha, fusion_alpha_key};
pub use rate_limit::RateLimitDecision;
pub use scoring::{ScoreMetadata, ScoredNote, ScoringOutcome};
pub use search::{SearchAnalyticsRecord, SearchHit, SearchRequest};
pub use tier::{ScoringTier, TierConfig, get_tier_config, get_tier_for_note_count};
