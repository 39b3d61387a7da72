//! Non-blocking audit emission.
//!
//! Audit records are handed to a bounded worker pool over a buffered
//! channel; when the buffer is full the newest record is rejected and
//! counted. Each persist attempt has a hard timeout. Nothing on this path
//! ever propagates to the request that produced the record.

use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use opennotes_domain::entities::AuditRecord;
use opennotes_domain::events::{DomainEvent, EventEnvelope};
use opennotes_domain::ports::{AuditRepository, EventBus};

/// Maximum serialized body size carried on an audit record.
pub const MAX_BODY_SIZE: usize = 10 * 1024;

/// Numeric arrays longer than this collapse to a prefix plus a marker.
const MAX_ARRAY_ELEMENTS: usize = 10;

/// Tuning for the audit publisher.
#[derive(Debug, Clone)]
pub struct AuditPublisherConfig {
    /// Worker task count.
    pub workers: usize,
    /// Channel capacity; overflow rejects the newest record.
    pub buffer: usize,
    /// Hard per-persist timeout.
    pub persist_timeout: Duration,
}

impl Default for AuditPublisherConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            buffer: 256,
            persist_timeout: Duration::from_secs(5),
        }
    }
}

/// Counters mirrored into metrics.
#[derive(Debug, Default)]
pub struct AuditStats {
    pub published_total: AtomicU64,
    pub failures_total: AtomicU64,
    pub timeouts_total: AtomicU64,
    pub rejected_total: AtomicU64,
}

/// Bounded async audit publisher.
pub struct AuditPublisher {
    sender: mpsc::Sender<AuditRecord>,
    stats: Arc<AuditStats>,
    workers: Vec<JoinHandle<()>>,
}

impl AuditPublisher {
    /// Spawn the worker pool.
    #[must_use]
    pub fn new(
        repository: Arc<dyn AuditRepository>,
        bus: Arc<dyn EventBus>,
        config: AuditPublisherConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel::<AuditRecord>(config.buffer.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let stats = Arc::new(AuditStats::default());

        let mut workers = Vec::with_capacity(config.workers.max(1));
        for _ in 0..config.workers.max(1) {
            let receiver = Arc::clone(&receiver);
            let repository = Arc::clone(&repository);
            let bus = Arc::clone(&bus);
            let stats = Arc::clone(&stats);
            let timeout = config.persist_timeout;

            workers.push(tokio::spawn(async move {
                loop {
                    let record = {
                        let mut rx = receiver.lock().await;
                        rx.recv().await
                    };
                    let Some(record) = record else { break };

                    match tokio::time::timeout(timeout, repository.insert(&record)).await {
                        Ok(Ok(())) => {
                            stats.published_total.fetch_add(1, Ordering::Relaxed);
                            let envelope =
                                EventEnvelope::new(DomainEvent::AuditLogPersisted {
                                    audit_id: record.id,
                                    user_id: record.user_id,
                                    path: record.path.clone(),
                                });
                            if let Err(e) = bus.publish(&envelope).await {
                                warn!(error = %e, "Failed to publish audit persisted event");
                            }
                        }
                        Ok(Err(e)) => {
                            stats.failures_total.fetch_add(1, Ordering::Relaxed);
                            warn!(audit_id = %record.id, error = %e, "Audit persist failed");
                        }
                        Err(_) => {
                            stats.timeouts_total.fetch_add(1, Ordering::Relaxed);
                            warn!(audit_id = %record.id, "Audit persist timed out");
                        }
                    }
                }
            }));
        }

        Self {
            sender,
            stats,
            workers,
        }
    }

    /// Hand a record to the pool. Never blocks; a full buffer rejects the
    /// record and bumps the rejection counter.
    pub fn publish(&self, record: AuditRecord) {
        match self.sender.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                self.stats.rejected_total.fetch_add(1, Ordering::Relaxed);
                warn!(audit_id = %record.id, "Audit buffer full, rejecting record");
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                self.stats.failures_total.fetch_add(1, Ordering::Relaxed);
                warn!(audit_id = %record.id, "Audit publisher stopped, dropping record");
            }
        }
    }

    #[must_use]
    pub fn stats(&self) -> &AuditStats {
        &self.stats
    }

    /// Drain and stop the worker pool.
    pub async fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            if worker.await.is_err() {
                warn!("Audit worker panicked during shutdown");
            }
        }
        info!("Audit publisher stopped");
    }
}

/// Truncate a request body for audit storage.
///
/// Bodies over [`MAX_BODY_SIZE`] serialized bytes are replaced by a
/// placeholder; long numeric arrays collapse to their first ten elements
/// plus an `…(N more)` marker.
#[must_use]
pub fn truncate_body(body: &Value) -> Value {
    let serialized_len = serde_json::to_vec(body).map(|v| v.len()).unwrap_or(0);
    if serialized_len > MAX_BODY_SIZE {
        return serde_json::json!({
            "_truncated": format!("Body size {serialized_len} exceeds limit")
        });
    }
    collapse_arrays(body)
}

fn collapse_arrays(value: &Value) -> Value {
    match value {
        Value::Array(items) => {
            let all_numeric = !items.is_empty() && items.iter().all(Value::is_number);
            if all_numeric && items.len() > MAX_ARRAY_ELEMENTS {
                let mut collapsed: Vec<Value> =
                    items.iter().take(MAX_ARRAY_ELEMENTS).cloned().collect();
                collapsed.push(Value::String(format!(
                    "…({} more)",
                    items.len() - MAX_ARRAY_ELEMENTS
                )));
                Value::Array(collapsed)
            } else {
                Value::Array(items.iter().map(collapse_arrays).collect())
            }
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), collapse_arrays(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}
