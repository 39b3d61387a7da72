//! Note-scoring adapter: tier selection, batch-trigger policy, and graceful
//! degradation over the pluggable scorer and data-provider ports.

use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use opennotes_domain::constants::BATCH_SCORING_THRESHOLD;
use opennotes_domain::entities::Note;
use opennotes_domain::error::Result;
use opennotes_domain::events::{DomainEvent, EventEnvelope};
use opennotes_domain::ports::{EventBus, NoteScorer, ScoringDataProvider};
use opennotes_domain::value_objects::{
    ScoreMetadata, ScoredNote, ScoringOutcome, get_tier_config, get_tier_for_note_count,
};

/// Policy deciding when a community becomes eligible for batch scoring.
#[derive(Debug, Clone, Copy)]
pub struct BatchScoringTrigger {
    threshold: u64,
}

/// Trigger status snapshot returned to the API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerStatus {
    pub threshold: u64,
    pub note_count: u64,
    pub ready_for_batch_scoring: bool,
    pub notes_until_batch: u64,
}

impl Default for BatchScoringTrigger {
    fn default() -> Self {
        Self {
            threshold: BATCH_SCORING_THRESHOLD,
        }
    }
}

impl BatchScoringTrigger {
    #[must_use]
    pub fn new(threshold: u64) -> Self {
        Self { threshold }
    }

    #[must_use]
    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Whether `note_count` is at or past the threshold.
    #[must_use]
    pub fn should_trigger(&self, note_count: u64) -> bool {
        note_count >= self.threshold
    }

    /// True exactly when the threshold is crossed for the first time.
    #[must_use]
    pub fn check_transition(&self, previous_count: u64, current_count: u64) -> bool {
        current_count >= self.threshold && previous_count < self.threshold
    }

    #[must_use]
    pub fn get_status(&self, note_count: u64) -> TriggerStatus {
        TriggerStatus {
            threshold: self.threshold,
            note_count,
            ready_for_batch_scoring: self.should_trigger(note_count),
            notes_until_batch: self.threshold.saturating_sub(note_count),
        }
    }
}

/// Tier-driven scoring over the data-provider and scorer ports.
///
/// MF scorer failures degrade to a deterministic stub score; degraded
/// outcomes are cached so a flapping scorer is not invoked repeatedly.
pub struct ScoringAdapter {
    data_provider: Arc<dyn ScoringDataProvider>,
    scorers: Vec<Arc<dyn NoteScorer>>,
    bus: Arc<dyn EventBus>,
    trigger: BatchScoringTrigger,
    degraded_cache: Cache<Uuid, ScoringOutcome>,
}

/// How long a degraded outcome suppresses scorer re-invocation.
const DEGRADED_CACHE_TTL: Duration = Duration::from_secs(600);

impl ScoringAdapter {
    #[must_use]
    pub fn new(
        data_provider: Arc<dyn ScoringDataProvider>,
        scorers: Vec<Arc<dyn NoteScorer>>,
        bus: Arc<dyn EventBus>,
        trigger: BatchScoringTrigger,
    ) -> Self {
        Self {
            data_provider,
            scorers,
            bus,
            trigger,
            degraded_cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(DEGRADED_CACHE_TTL)
                .build(),
        }
    }

    #[must_use]
    pub fn trigger(&self) -> &BatchScoringTrigger {
        &self.trigger
    }

    /// Score every note of a community at its current tier.
    pub async fn score_community(&self, community_server_id: Uuid) -> Result<ScoringOutcome> {
        if let Some(cached) = self.degraded_cache.get(&community_server_id).await {
            info!(community_server_id = %community_server_id, "Serving cached degraded scores");
            return Ok(cached);
        }

        let notes = self.data_provider.notes_for_community(community_server_id).await?;
        let ratings = self
            .data_provider
            .ratings_for_community(community_server_id)
            .await?;

        let note_count = notes.len() as u64;
        let tier = get_tier_for_note_count(note_count);
        let config = get_tier_config(note_count);

        let (scores, degraded) = self.run_scorers(config.scorers, &notes, &ratings).await;
        let scores = if config.confidence_warnings {
            scores
                .into_iter()
                .map(|mut s| {
                    s.metadata.confidence_warning = true;
                    s
                })
                .collect()
        } else {
            scores
        };

        let outcome = ScoringOutcome {
            community_server_id,
            tier,
            note_count,
            scores,
        };

        if degraded {
            self.degraded_cache
                .insert(community_server_id, outcome.clone())
                .await;
        }

        let envelope = EventEnvelope::new(DomainEvent::NoteScoreUpdated {
            community_server_id,
            note_id: None,
            note_count,
            batch_scoring: self.trigger.should_trigger(note_count),
        });
        if let Err(e) = self.bus.publish(&envelope).await {
            warn!(error = %e, "Failed to publish score update event");
        }

        Ok(outcome)
    }

    /// Score an ad-hoc payload of notes and ratings at the tier implied by
    /// the note count. Backs the direct scoring endpoint.
    pub async fn score_notes(
        &self,
        notes: &[Note],
        ratings: &[opennotes_domain::entities::Rating],
    ) -> Result<Vec<ScoredNote>> {
        let config = get_tier_config(notes.len() as u64);
        let (scores, _) = self.run_scorers(config.scorers, notes, ratings).await;
        Ok(scores)
    }

    /// Called when a community's note count changes. Publishes a batch
    /// scoring trigger event exactly on the first threshold crossing.
    pub async fn on_note_count_changed(
        &self,
        community_server_id: Uuid,
        previous_count: u64,
        current_count: u64,
    ) -> Result<bool> {
        if !self.trigger.check_transition(previous_count, current_count) {
            return Ok(false);
        }
        info!(
            community_server_id = %community_server_id,
            current_count,
            "Note count crossed batch scoring threshold"
        );
        let envelope = EventEnvelope::new(DomainEvent::NoteScoreUpdated {
            community_server_id,
            note_id: None,
            note_count: current_count,
            batch_scoring: true,
        });
        self.bus.publish(&envelope).await?;
        Ok(true)
    }

    /// Run the tier's scorers, merging their outputs; any scorer failure
    /// falls the whole run back to the stub.
    async fn run_scorers(
        &self,
        wanted: &[&str],
        notes: &[Note],
        ratings: &[opennotes_domain::entities::Rating],
    ) -> (Vec<ScoredNote>, bool) {
        let selected: Vec<_> = self
            .scorers
            .iter()
            .filter(|s| wanted.contains(&s.name()))
            .collect();

        if selected.is_empty() {
            // MINIMAL tier or no scorer registered: Bayesian average.
            return (bayesian_average(notes, ratings), false);
        }

        let mut merged: Vec<ScoredNote> = Vec::new();
        for scorer in selected {
            match scorer.score(notes, ratings).await {
                Ok(scores) => merged = merge_scores(merged, scores),
                Err(e) => {
                    warn!(scorer = scorer.name(), error = %e, "Scorer failed, degrading to stub");
                    return (stub_scores(notes), true);
                }
            }
        }
        (merged, false)
    }
}

/// Later scorers refine earlier ones; scores for the same note are averaged.
fn merge_scores(mut base: Vec<ScoredNote>, refinement: Vec<ScoredNote>) -> Vec<ScoredNote> {
    for refined in refinement {
        if let Some(existing) = base.iter_mut().find(|s| s.note_id == refined.note_id) {
            existing.score = (existing.score + refined.score) / 2.0;
            existing.confidence_level = refined.confidence_level;
        } else {
            base.push(refined);
        }
    }
    base
}

/// Bayesian average for the MINIMAL tier: shrink each note's helpful ratio
/// toward the global prior, weighted by rating volume.
fn bayesian_average(
    notes: &[Note],
    ratings: &[opennotes_domain::entities::Rating],
) -> Vec<ScoredNote> {
    const PRIOR_WEIGHT: f64 = 5.0;
    const PRIOR_MEAN: f64 = 0.5;

    notes
        .iter()
        .map(|note| {
            let note_ratings: Vec<_> = ratings.iter().filter(|r| r.note_id == note.id).collect();
            let helpful = note_ratings
                .iter()
                .filter(|r| r.helpfulness_level == "helpful")
                .count() as f64;
            let total = note_ratings.len() as f64;
            let score = (helpful + PRIOR_WEIGHT * PRIOR_MEAN) / (total + PRIOR_WEIGHT);
            ScoredNote {
                note_id: note.id,
                score,
                confidence_level: if total >= 3.0 { "medium" } else { "low" }.to_owned(),
                metadata: ScoreMetadata {
                    source: "BayesianAverageScorer".to_owned(),
                    degraded: false,
                    confidence_warning: false,
                },
            }
        })
        .collect()
}

/// Deterministic stub used when the MF scorer raises.
fn stub_scores(notes: &[Note]) -> Vec<ScoredNote> {
    notes
        .iter()
        .map(|note| ScoredNote {
            note_id: note.id,
            score: 0.5,
            confidence_level: "none".to_owned(),
            metadata: ScoreMetadata {
                source: "batch_stub".to_owned(),
                degraded: true,
                confidence_warning: false,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rstest::rstest;

    #[test]
    fn default_threshold_is_200() {
        assert_eq!(BatchScoringTrigger::default().threshold(), 200);
    }

    #[rstest]
    #[case(0, false)]
    #[case(199, false)]
    #[case(200, true)]
    #[case(500, true)]
    fn should_trigger_at_threshold(#[case] count: u64, #[case] expected: bool) {
        assert_eq!(BatchScoringTrigger::default().should_trigger(count), expected);
    }

    #[rstest]
    #[case(199, 200, true)]
    #[case(200, 201, false)]
    #[case(100, 150, false)]
    #[case(199, 250, true)]
    #[case(200, 199, false)]
    fn check_transition_truth_table(
        #[case] previous: u64,
        #[case] current: u64,
        #[case] expected: bool,
    ) {
        let trigger = BatchScoringTrigger::default();
        assert_eq!(trigger.check_transition(previous, current), expected);
    }

    #[test]
    fn status_reports_notes_until_batch() {
        let status = BatchScoringTrigger::default().get_status(150);
        assert_eq!(status.threshold, 200);
        assert_eq!(status.notes_until_batch, 50);
        assert!(!status.ready_for_batch_scoring);

        let status = BatchScoringTrigger::default().get_status(250);
        assert_eq!(status.notes_until_batch, 0);
        assert!(status.ready_for_batch_scoring);
    }

    fn note(id: Uuid) -> Note {
        Note {
            id,
            author_participant_id: "p1".to_owned(),
            community_server_id: Uuid::now_v7(),
            classification: None,
            status: None,
            helpfulness_score: None,
            created_at: Utc::now(),
        }
    }

    fn rating(note_id: Uuid, level: &str) -> opennotes_domain::entities::Rating {
        opennotes_domain::entities::Rating {
            id: Uuid::now_v7(),
            note_id,
            rater_participant_id: "r1".to_owned(),
            helpfulness_level: level.to_owned(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn bayesian_average_shrinks_toward_prior() {
        let id = Uuid::now_v7();
        let notes = vec![note(id)];
        // No ratings: exactly the prior mean.
        let scores = bayesian_average(&notes, &[]);
        assert!((scores[0].score - 0.5).abs() < 1e-12);

        // All helpful: above prior but below 1.0.
        let ratings: Vec<_> = (0..4).map(|_| rating(id, "helpful")).collect();
        let scores = bayesian_average(&notes, &ratings);
        assert!(scores[0].score > 0.5);
        assert!(scores[0].score < 1.0);
    }

    #[test]
    fn stub_scores_are_marked_degraded() {
        let scores = stub_scores(&[note(Uuid::now_v7())]);
        assert_eq!(scores[0].metadata.source, "batch_stub");
        assert!(scores[0].metadata.degraded);
        assert_eq!(scores[0].score, 0.5);
    }

    #[test]
    fn merge_averages_shared_notes() {
        let id = Uuid::now_v7();
        let meta = ScoreMetadata {
            source: "MFCoreScorer".to_owned(),
            degraded: false,
            confidence_warning: false,
        };
        let base = vec![ScoredNote {
            note_id: id,
            score: 0.4,
            confidence_level: "low".to_owned(),
            metadata: meta.clone(),
        }];
        let refinement = vec![ScoredNote {
            note_id: id,
            score: 0.8,
            confidence_level: "high".to_owned(),
            metadata: meta,
        }];
        let merged = merge_scores(base, refinement);
        assert_eq!(merged.len(), 1);
        assert!((merged[0].score - 0.6).abs() < 1e-12);
        assert_eq!(merged[0].confidence_level, "high");
    }
}
