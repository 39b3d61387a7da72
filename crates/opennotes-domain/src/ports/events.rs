//! Durable event bus port.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::events::EventEnvelope;

/// Handler for one delivered event.
///
/// Returning `Ok` acknowledges the message; an error triggers redelivery
/// with bounded retry and eventual dead-lettering, so handlers must be
/// idempotent.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: EventEnvelope) -> Result<()>;
}

/// Health of one tracked durable subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHealth {
    pub consumer_name: String,
    pub subject: String,
    pub healthy: bool,
}

/// Durable at-least-once pub/sub.
///
/// Consumers are identified by a durable name and survive reconnects;
/// multiple instances subscribing with the same name form a
/// competing-consumer group. Subscribing first tries to *join* the existing
/// consumer; only a configuration-mismatch error may delete and recreate
/// it.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish an envelope on its subject.
    async fn publish(&self, envelope: &EventEnvelope) -> Result<()>;

    /// Subscribe a durable consumer to a subject filter.
    ///
    /// The subscription is tracked so health checks can detect a deleted
    /// consumer and re-subscribe.
    async fn subscribe_durable(
        &self,
        consumer_name: &str,
        subject: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<()>;

    /// Check every tracked subscription, re-subscribing any whose consumer
    /// has been deleted. Returns the post-check health of each.
    async fn check_subscription_health(&self) -> Result<Vec<SubscriptionHealth>>;

    /// Cancel all subscription tasks.
    async fn stop(&self) -> Result<()>;
}
