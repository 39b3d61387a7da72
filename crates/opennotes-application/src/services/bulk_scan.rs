//! Bulk content scan: event-driven processing of historical message
//! batches with moderation, flashpoint detection and fact-check similarity.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use async_trait::async_trait;
use opennotes_domain::error::{Error, Result};
use opennotes_domain::events::{
    BulkScanMessage, DomainEvent, EventEnvelope, FlaggedMessage, MessageScores,
};
use opennotes_domain::ports::{
    CommunityServerRepository, EventBus, EventHandler, FlashpointDetector, ModerationProvider,
};
use opennotes_domain::value_objects::SearchRequest;

use super::search::HybridSearchService;

/// Tuning for the scan pipeline.
#[derive(Debug, Clone)]
pub struct BulkScanConfig {
    /// Sliding conversational context passed to the flashpoint detector.
    pub max_context_messages: usize,
    /// Similarity score above which a message is flagged as matching a
    /// fact-check.
    pub similarity_flag_threshold: f64,
    /// Run moderation at all (requires a configured provider).
    pub moderation_enabled: bool,
}

impl Default for BulkScanConfig {
    fn default() -> Self {
        Self {
            max_context_messages: 5,
            similarity_flag_threshold: 0.85,
            moderation_enabled: true,
        }
    }
}

/// Mutable state for one in-flight scan.
struct ScanState {
    community_server_id: Uuid,
    debug_mode: bool,
    messages_scanned: u64,
    flagged: Vec<FlaggedMessage>,
    /// Sliding context per channel, newest last.
    context: DashMap<String, VecDeque<BulkScanMessage>>,
}

/// Long-running scan over a community's recent messages, driven entirely
/// via the event bus.
pub struct BulkScanService {
    bus: Arc<dyn EventBus>,
    communities: Arc<dyn CommunityServerRepository>,
    moderation: Option<Arc<dyn ModerationProvider>>,
    flashpoints: Arc<dyn FlashpointDetector>,
    search: Arc<HybridSearchService>,
    config: BulkScanConfig,
    scans: DashMap<Uuid, ScanState>,
}

impl BulkScanService {
    #[must_use]
    pub fn new(
        bus: Arc<dyn EventBus>,
        communities: Arc<dyn CommunityServerRepository>,
        moderation: Option<Arc<dyn ModerationProvider>>,
        flashpoints: Arc<dyn FlashpointDetector>,
        search: Arc<HybridSearchService>,
        config: BulkScanConfig,
    ) -> Self {
        Self {
            bus,
            communities,
            moderation,
            flashpoints,
            search,
            config,
            scans: DashMap::new(),
        }
    }

    /// Record scan parameters and publish BULK_SCAN_INITIATED.
    pub async fn initiate(
        &self,
        community_server_id: Uuid,
        channel_ids: Vec<String>,
        window_days: u32,
    ) -> Result<Uuid> {
        let community = self
            .communities
            .get(community_server_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("community server {community_server_id}")))?;

        let scan_id = Uuid::now_v7();
        self.scans.insert(
            scan_id,
            ScanState {
                community_server_id,
                debug_mode: community.vibecheck_debug_mode,
                messages_scanned: 0,
                flagged: Vec::new(),
                context: DashMap::new(),
            },
        );

        self.bus
            .publish(&EventEnvelope::new(DomainEvent::BulkScanInitiated {
                scan_id,
                community_server_id,
                channel_ids,
                window_days,
            }))
            .await?;
        info!(scan_id = %scan_id, community_server_id = %community_server_id, "Bulk scan initiated");
        Ok(scan_id)
    }

    /// Process one message batch; on the final batch publish COMPLETED and
    /// RESULTS and drop the scan state.
    pub async fn process_batch(
        &self,
        scan_id: Uuid,
        messages: Vec<BulkScanMessage>,
        batch_number: u32,
        is_final_batch: bool,
    ) -> Result<()> {
        let (community_server_id, debug_mode) = {
            let state = self
                .scans
                .get(&scan_id)
                .ok_or_else(|| Error::not_found(format!("scan {scan_id}")))?;
            (state.community_server_id, state.debug_mode)
        };

        let mut batch_scores = Vec::with_capacity(messages.len());
        for message in &messages {
            let scores = self.score_message(scan_id, community_server_id, message).await;
            batch_scores.push(scores);
        }

        {
            let mut state = self
                .scans
                .get_mut(&scan_id)
                .ok_or_else(|| Error::not_found(format!("scan {scan_id}")))?;
            state.messages_scanned += messages.len() as u64;
            for (message, scores) in messages.iter().zip(&batch_scores) {
                let mut reasons = Vec::new();
                if scores.moderation_flagged {
                    reasons.push("moderation".to_owned());
                }
                if scores.flashpoint_confidence.unwrap_or(0.0) >= 0.5 {
                    reasons.push("flashpoint".to_owned());
                }
                if scores.similarity_top_score.unwrap_or(0.0)
                    >= self.config.similarity_flag_threshold
                {
                    reasons.push("fact_check_match".to_owned());
                }
                if !reasons.is_empty() {
                    state.flagged.push(FlaggedMessage {
                        message: message.clone(),
                        reasons,
                        scores: scores.clone(),
                    });
                }
            }
        }

        if debug_mode {
            self.bus
                .publish(&EventEnvelope::new(DomainEvent::BulkScanProgress {
                    scan_id,
                    batch_number,
                    scores: batch_scores,
                }))
                .await?;
        }

        if is_final_batch {
            let Some((_, state)) = self.scans.remove(&scan_id) else {
                return Err(Error::not_found(format!("scan {scan_id}")));
            };
            self.bus
                .publish(&EventEnvelope::new(DomainEvent::BulkScanCompleted {
                    scan_id,
                    messages_scanned: state.messages_scanned,
                }))
                .await?;
            self.bus
                .publish(&EventEnvelope::new(DomainEvent::BulkScanResults {
                    scan_id,
                    flagged_messages: state.flagged,
                }))
                .await?;
            info!(
                scan_id = %scan_id,
                messages_scanned = state.messages_scanned,
                "Bulk scan completed"
            );
        }
        Ok(())
    }

    /// Run moderation, flashpoint detection and fact-check similarity for
    /// one message, maintaining the sliding conversational context.
    async fn score_message(
        &self,
        scan_id: Uuid,
        _community_server_id: Uuid,
        message: &BulkScanMessage,
    ) -> MessageScores {
        let moderation_flagged = match (&self.moderation, self.config.moderation_enabled) {
            (Some(moderation), true) => match moderation.moderate(&message.content).await {
                Ok(verdict) => verdict.flagged,
                Err(e) => {
                    warn!(error = %e, "Moderation failed for message, treating as clean");
                    false
                }
            },
            _ => false,
        };

        let context: Vec<BulkScanMessage> = self
            .scans
            .get(&scan_id)
            .and_then(|state| {
                state
                    .context
                    .get(&message.channel_id)
                    .map(|ctx| ctx.iter().cloned().collect())
            })
            .unwrap_or_default();

        // Transient detector errors read as "no flashpoint"; only critical
        // errors would propagate, and the detector maps those already.
        let flashpoint_confidence = match self.flashpoints.detect(&context, message).await {
            Ok(verdict) if verdict.will_derail => Some(verdict.confidence),
            Ok(verdict) => Some(verdict.confidence.min(0.49)),
            Err(e) => {
                warn!(error = %e, "Flashpoint detection failed, assuming no flashpoint");
                None
            }
        };

        if let Some(state) = self.scans.get(&scan_id) {
            let mut ctx = state
                .context
                .entry(message.channel_id.clone())
                .or_default();
            ctx.push_back(message.clone());
            while ctx.len() > self.config.max_context_messages {
                ctx.pop_front();
            }
        }

        let similarity_top_score = match self
            .search
            .search(
                &SearchRequest {
                    query: message.content.clone(),
                    dataset_tags: Vec::new(),
                    top_k: 1,
                },
                &format!("bulk_scan:{scan_id}"),
            )
            .await
        {
            Ok(hits) => hits.first().map(|h| h.final_score),
            Err(e) => {
                warn!(error = %e, "Similarity search failed during scan");
                None
            }
        };

        MessageScores {
            message_id: message.message_id.clone(),
            moderation_flagged,
            flashpoint_confidence,
            similarity_top_score,
        }
    }
}

/// Durable consumer handler for `bulk_scan.message_batch` events.
#[async_trait]
impl EventHandler for BulkScanService {
    async fn handle(&self, envelope: EventEnvelope) -> Result<()> {
        match envelope.event {
            DomainEvent::BulkScanMessageBatch {
                scan_id,
                messages,
                batch_number,
                is_final_batch,
            } => {
                self.process_batch(scan_id, messages, batch_number, is_final_batch)
                    .await
            }
            _ => Ok(()),
        }
    }
}
