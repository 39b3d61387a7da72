//! Bulk content scan lifecycle over the recording bus.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use opennotes_application::services::{
    BulkScanConfig, BulkScanService, EmbeddingPipeline, HybridSearchService,
};
use opennotes_domain::entities::CommunityServer;
use opennotes_domain::error::Result;
use opennotes_domain::events::{BulkScanMessage, DomainEvent};
use opennotes_domain::ports::{
    CommunityServerRepository, FlashpointDetector, FlashpointVerdict,
};

use crate::fakes::{EmptyChunks, InMemoryCache, InMemoryTokenBucket, RecordingBus, ScriptedEmbeddingProvider};

struct OneCommunity {
    community: CommunityServer,
}

#[async_trait]
impl CommunityServerRepository for OneCommunity {
    async fn get(&self, id: Uuid) -> Result<Option<CommunityServer>> {
        Ok((self.community.id == id).then(|| self.community.clone()))
    }

    async fn get_by_platform_id(&self, platform_id: &str) -> Result<Option<CommunityServer>> {
        Ok((self.community.platform_community_server_id == platform_id)
            .then(|| self.community.clone()))
    }

    async fn set_welcome_message(&self, _id: Uuid, _message: Option<String>) -> Result<()> {
        Ok(())
    }

    async fn count_notes(&self, _community_server_id: Uuid) -> Result<u64> {
        Ok(0)
    }
}

/// Flags any message containing "fight".
struct KeywordFlashpoints;

#[async_trait]
impl FlashpointDetector for KeywordFlashpoints {
    async fn detect(
        &self,
        _context: &[BulkScanMessage],
        message: &BulkScanMessage,
    ) -> Result<FlashpointVerdict> {
        let hot = message.content.contains("fight");
        Ok(FlashpointVerdict {
            will_derail: hot,
            confidence: if hot { 0.9 } else { 0.1 },
            reasoning: String::new(),
        })
    }
}

fn community(debug_mode: bool) -> CommunityServer {
    CommunityServer {
        id: Uuid::now_v7(),
        platform: "discord".to_owned(),
        platform_community_server_id: "123456".to_owned(),
        name: "test guild".to_owned(),
        is_active: true,
        welcome_message: None,
        vibecheck_debug_mode: debug_mode,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn message(id: &str, content: &str) -> BulkScanMessage {
    BulkScanMessage {
        message_id: id.to_owned(),
        channel_id: "general".to_owned(),
        author_id: "user-1".to_owned(),
        content: content.to_owned(),
        timestamp: Utc::now(),
    }
}

fn scan_service(debug_mode: bool) -> (BulkScanService, Arc<RecordingBus>, CommunityServer) {
    let bus = Arc::new(RecordingBus::new());
    let community = community(debug_mode);
    let cache = Arc::new(InMemoryCache::new());
    let search = Arc::new(HybridSearchService::new(
        Arc::new(EmptyChunks),
        cache.clone(),
        Arc::new(EmbeddingPipeline::new(
            Arc::new(ScriptedEmbeddingProvider::succeeding()),
            cache,
            Arc::new(InMemoryTokenBucket::new(10)),
        )),
    ));
    let service = BulkScanService::new(
        bus.clone(),
        Arc::new(OneCommunity {
            community: community.clone(),
        }),
        None,
        Arc::new(KeywordFlashpoints),
        search,
        BulkScanConfig::default(),
    );
    (service, bus, community)
}

#[tokio::test]
async fn full_scan_publishes_completed_and_results() {
    let (service, bus, community) = scan_service(false);
    let scan_id = service
        .initiate(community.id, vec!["general".to_owned()], 30)
        .await
        .unwrap();

    service
        .process_batch(
            scan_id,
            vec![message("1", "hello there"), message("2", "lets fight about it")],
            1,
            false,
        )
        .await
        .unwrap();
    service
        .process_batch(scan_id, vec![message("3", "calm again")], 2, true)
        .await
        .unwrap();

    let events = bus.published();
    let types: Vec<&'static str> = events.iter().map(|e| e.event.event_type()).collect();
    assert_eq!(
        types,
        vec![
            "bulk_scan.initiated",
            "bulk_scan.completed",
            "bulk_scan.results",
        ]
    );

    match &events[1].event {
        DomainEvent::BulkScanCompleted { messages_scanned, .. } => {
            assert_eq!(*messages_scanned, 3);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match &events[2].event {
        DomainEvent::BulkScanResults { flagged_messages, .. } => {
            assert_eq!(flagged_messages.len(), 1);
            assert_eq!(flagged_messages[0].message.message_id, "2");
            assert!(flagged_messages[0].reasons.contains(&"flashpoint".to_owned()));
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn debug_mode_publishes_progress_per_batch_with_every_message() {
    let (service, bus, community) = scan_service(true);
    let scan_id = service
        .initiate(community.id, vec!["general".to_owned()], 7)
        .await
        .unwrap();

    service
        .process_batch(
            scan_id,
            vec![message("1", "benign"), message("2", "also benign")],
            1,
            true,
        )
        .await
        .unwrap();

    let progress: Vec<_> = bus
        .published()
        .into_iter()
        .filter_map(|e| match e.event {
            DomainEvent::BulkScanProgress { batch_number, scores, .. } => {
                Some((batch_number, scores))
            }
            _ => None,
        })
        .collect();
    assert_eq!(progress.len(), 1);
    let (batch_number, scores) = &progress[0];
    assert_eq!(*batch_number, 1);
    // Scores for every message, not only flagged ones.
    assert_eq!(scores.len(), 2);
}

#[tokio::test]
async fn unknown_scan_id_is_a_not_found() {
    let (service, _, _) = scan_service(false);
    let result = service
        .process_batch(Uuid::now_v7(), vec![message("1", "x")], 1, false)
        .await;
    assert!(result.is_err());
}
