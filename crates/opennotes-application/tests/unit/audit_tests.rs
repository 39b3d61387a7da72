//! Audit publisher resilience.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use uuid::Uuid;

use chrono::Utc;
use opennotes_application::services::{AuditPublisher, AuditPublisherConfig};
use opennotes_domain::entities::AuditRecord;

use crate::fakes::{RecordingBus, SlowAuditRepository};

fn record() -> AuditRecord {
    AuditRecord {
        id: Uuid::now_v7(),
        user_id: Uuid::now_v7(),
        method: "POST".to_owned(),
        path: "/api/v1/batch-jobs".to_owned(),
        status_code: 201,
        details: serde_json::json!({"status_code": 201}),
        occurred_at: Utc::now(),
        duration_ms: 12,
    }
}

#[tokio::test]
async fn successful_persist_publishes_the_bus_event() {
    let repo = Arc::new(SlowAuditRepository::new(Duration::ZERO));
    let bus = Arc::new(RecordingBus::new());
    let publisher = AuditPublisher::new(repo.clone(), bus.clone(), AuditPublisherConfig::default());

    publisher.publish(record());
    publisher.shutdown().await;

    assert_eq!(repo.inserted.lock().unwrap().len(), 1);
    let events = bus.published();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].subject(), "OPENNOTES.audit.log_persisted");
}

#[tokio::test(start_paused = true)]
async fn slow_persist_times_out_and_counts() {
    let repo = Arc::new(SlowAuditRepository::new(Duration::from_secs(30)));
    let bus = Arc::new(RecordingBus::new());
    let publisher = AuditPublisher::new(
        repo.clone(),
        bus.clone(),
        AuditPublisherConfig {
            workers: 1,
            buffer: 8,
            persist_timeout: Duration::from_secs(5),
        },
    );

    // publish() itself returns immediately: the request path never blocks.
    publisher.publish(record());
    assert_eq!(publisher.stats().timeouts_total.load(Ordering::Relaxed), 0);

    // Let the worker hit the 5s timeout (virtual time).
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(publisher.stats().timeouts_total.load(Ordering::Relaxed), 1);

    publisher.shutdown().await;

    // Nothing reached storage and no bus event was published.
    assert_eq!(repo.inserted.lock().unwrap().len(), 0);
    assert!(bus.published().is_empty());
}

#[tokio::test]
async fn full_buffer_rejects_the_newest_record() {
    // Slow worker + tiny buffer: the channel fills up.
    let repo = Arc::new(SlowAuditRepository::new(Duration::from_millis(200)));
    let bus = Arc::new(RecordingBus::new());
    let publisher = AuditPublisher::new(
        repo,
        bus,
        AuditPublisherConfig {
            workers: 1,
            buffer: 1,
            persist_timeout: Duration::from_secs(5),
        },
    );

    for _ in 0..10 {
        publisher.publish(record());
    }
    let rejected = publisher.stats().rejected_total.load(Ordering::Relaxed);
    assert!(rejected > 0, "expected overflow rejections, got {rejected}");
    publisher.shutdown().await;
}
