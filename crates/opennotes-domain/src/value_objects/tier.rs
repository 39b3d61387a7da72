//! Adaptive scoring tier selection.
//!
//! Communities move through tiers as their note volume grows; each tier
//! names the scorers the adapter runs. Ranges are contiguous and total, and
//! a boundary count belongs to the higher tier.

use serde::{Deserialize, Serialize};

/// Scoring tier, selected by total note count per community.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoringTier {
    Minimal,
    Limited,
    Basic,
    Intermediate,
    Advanced,
    Full,
}

impl ScoringTier {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Limited => "limited",
            Self::Basic => "basic",
            Self::Intermediate => "intermediate",
            Self::Advanced => "advanced",
            Self::Full => "full",
        }
    }
}

/// Configuration for one tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierConfig {
    pub tier: ScoringTier,
    pub min_notes: u64,
    /// Exclusive upper bound; `None` for the open-ended top tier.
    pub max_notes: Option<u64>,
    pub scorers: &'static [&'static str],
    pub requires_full_pipeline: bool,
    pub enable_clustering: bool,
    /// Low-volume tiers annotate results with confidence warnings.
    pub confidence_warnings: bool,
}

const TIER_CONFIGURATIONS: &[TierConfig] = &[
    TierConfig {
        tier: ScoringTier::Minimal,
        min_notes: 0,
        max_notes: Some(200),
        scorers: &["BayesianAverageScorer"],
        requires_full_pipeline: false,
        enable_clustering: false,
        confidence_warnings: true,
    },
    TierConfig {
        tier: ScoringTier::Limited,
        min_notes: 200,
        max_notes: Some(1000),
        scorers: &["MFCoreScorer"],
        requires_full_pipeline: false,
        enable_clustering: false,
        confidence_warnings: true,
    },
    TierConfig {
        tier: ScoringTier::Basic,
        min_notes: 1000,
        max_notes: Some(5000),
        scorers: &["MFCoreScorer"],
        requires_full_pipeline: false,
        enable_clustering: false,
        confidence_warnings: false,
    },
    TierConfig {
        tier: ScoringTier::Intermediate,
        min_notes: 5000,
        max_notes: Some(10000),
        scorers: &["MFCoreScorer", "MFExpansionScorer"],
        requires_full_pipeline: false,
        enable_clustering: false,
        confidence_warnings: false,
    },
    TierConfig {
        tier: ScoringTier::Advanced,
        min_notes: 10000,
        max_notes: Some(50000),
        scorers: &[
            "MFCoreScorer",
            "MFExpansionScorer",
            "MFGroupScorer",
            "MFExpansionPlusScorer",
        ],
        requires_full_pipeline: true,
        enable_clustering: false,
        confidence_warnings: false,
    },
    TierConfig {
        tier: ScoringTier::Full,
        min_notes: 50000,
        max_notes: None,
        scorers: &[
            "MFCoreScorer",
            "MFExpansionScorer",
            "MFGroupScorer",
            "MFExpansionPlusScorer",
        ],
        requires_full_pipeline: true,
        enable_clustering: true,
        confidence_warnings: false,
    },
];

/// The unique tier containing `note_count`.
#[must_use]
pub fn get_tier_for_note_count(note_count: u64) -> ScoringTier {
    get_tier_config(note_count).tier
}

/// Full configuration for the tier containing `note_count`.
#[must_use]
pub fn get_tier_config(note_count: u64) -> &'static TierConfig {
    TIER_CONFIGURATIONS
        .iter()
        .find(|c| note_count >= c.min_notes && c.max_notes.is_none_or(|max| note_count < max))
        .unwrap_or(&TIER_CONFIGURATIONS[TIER_CONFIGURATIONS.len() - 1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, ScoringTier::Minimal)]
    #[case(50, ScoringTier::Minimal)]
    #[case(199, ScoringTier::Minimal)]
    #[case(200, ScoringTier::Limited)]
    #[case(999, ScoringTier::Limited)]
    #[case(1000, ScoringTier::Basic)]
    #[case(4999, ScoringTier::Basic)]
    #[case(5000, ScoringTier::Intermediate)]
    #[case(9999, ScoringTier::Intermediate)]
    #[case(10000, ScoringTier::Advanced)]
    #[case(49999, ScoringTier::Advanced)]
    #[case(50000, ScoringTier::Full)]
    #[case(1_000_000, ScoringTier::Full)]
    fn boundaries_belong_to_the_higher_tier(#[case] count: u64, #[case] expected: ScoringTier) {
        assert_eq!(get_tier_for_note_count(count), expected);
    }

    #[test]
    fn ranges_are_contiguous_and_total() {
        for window in TIER_CONFIGURATIONS.windows(2) {
            assert_eq!(window[0].max_notes, Some(window[1].min_notes));
        }
        assert_eq!(TIER_CONFIGURATIONS[0].min_notes, 0);
        assert!(TIER_CONFIGURATIONS.last().unwrap().max_notes.is_none());
    }

    #[test]
    fn minimal_uses_bayesian_average_only() {
        let config = get_tier_config(10);
        assert_eq!(config.scorers, &["BayesianAverageScorer"]);
        assert!(config.confidence_warnings);
        assert!(!config.enable_clustering);
    }

    #[test]
    fn advanced_runs_four_mf_scorers() {
        let config = get_tier_config(25_000);
        assert_eq!(config.scorers.len(), 4);
        assert!(config.requires_full_pipeline);
    }

    #[test]
    fn full_enables_clustering() {
        assert!(get_tier_config(60_000).enable_clustering);
    }
}
