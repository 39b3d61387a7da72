//! NATS JetStream implementation of the durable event bus.
//!
//! One stream owns the `OPENNOTES.>` subject space. Durable consumers are
//! joined, not recreated: creating an existing consumer with identical
//! configuration is idempotent, and only a configuration-mismatch error
//! triggers delete + recreate. Handler errors leave the message
//! unacknowledged for redelivery; after `MAX_DELIVER` attempts the payload
//! is dead-lettered and acknowledged.

use async_nats::jetstream;
use async_nats::jetstream::consumer::pull::Config as PullConfig;
use async_nats::jetstream::consumer::PullConsumer;
use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use opennotes_domain::constants::{DLQ_SUBJECT_ROOT, EVENT_SUBJECT_ROOT};
use opennotes_domain::error::{Error, Result};
use opennotes_domain::events::EventEnvelope;
use opennotes_domain::ports::{EventBus, EventHandler, SubscriptionHealth};

/// Stream backing the whole subject space.
const STREAM_NAME: &str = "OPENNOTES";

/// Redelivery bound before dead-lettering.
const MAX_DELIVER: i64 = 5;

fn bus_err<E: std::fmt::Display>(context: &str, e: E) -> Error {
    Error::event_bus(format!("{context}: {e}"))
}

struct Subscription {
    consumer_name: String,
    subject: String,
    handler: Arc<dyn EventHandler>,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// JetStream event bus.
pub struct NatsEventBus {
    client: async_nats::Client,
    stream: jetstream::stream::Stream,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl NatsEventBus {
    /// Connect and ensure the stream exists.
    pub async fn connect(url: &str) -> Result<Self> {
        info!(url, "Connecting to NATS");
        let client = async_nats::connect(url)
            .await
            .map_err(|e| bus_err("Failed to connect to NATS", e))?;
        let context = jetstream::new(client.clone());

        let stream = context
            .get_or_create_stream(jetstream::stream::Config {
                name: STREAM_NAME.to_owned(),
                subjects: vec![format!("{EVENT_SUBJECT_ROOT}.>")],
                ..Default::default()
            })
            .await
            .map_err(|e| bus_err("Failed to ensure event stream", e))?;

        info!("Connected to NATS JetStream");
        Ok(Self {
            client,
            stream,
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    fn consumer_config(consumer_name: &str, subject: &str) -> PullConfig {
        PullConfig {
            durable_name: Some(consumer_name.to_owned()),
            filter_subject: subject.to_owned(),
            max_deliver: MAX_DELIVER,
            ..Default::default()
        }
    }

    /// Join-or-create the durable consumer.
    ///
    /// `create_consumer` is idempotent for identical configuration, so a
    /// second instance simply joins the competing-consumer group. A
    /// configuration mismatch is the only case where the consumer is
    /// deleted and recreated.
    async fn ensure_consumer(&self, consumer_name: &str, subject: &str) -> Result<PullConsumer> {
        let config = Self::consumer_config(consumer_name, subject);
        match self.stream.create_consumer(config.clone()).await {
            Ok(consumer) => Ok(consumer),
            Err(e) => {
                warn!(
                    consumer_name,
                    error = %e,
                    "Consumer configuration mismatch, recreating"
                );
                self.stream
                    .delete_consumer(consumer_name)
                    .await
                    .map_err(|e| bus_err("Failed to delete conflicting consumer", e))?;
                self.stream
                    .create_consumer(config)
                    .await
                    .map_err(|e| bus_err("Failed to recreate consumer", e))
            }
        }
    }

    fn spawn_consumer_task(
        consumer_name: String,
        subject: String,
        consumer: PullConsumer,
        handler: Arc<dyn EventHandler>,
        client: async_nats::Client,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut messages = match consumer.messages().await {
                Ok(messages) => messages,
                Err(e) => {
                    error!(consumer_name, error = %e, "Failed to open consumer message stream");
                    return;
                }
            };

            loop {
                let message = tokio::select! {
                    () = cancel.cancelled() => {
                        debug!(consumer_name, "Consumer task cancelled");
                        return;
                    }
                    message = messages.next() => message,
                };
                let Some(message) = message else {
                    warn!(consumer_name, "Consumer message stream ended");
                    return;
                };
                let message = match message {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(consumer_name, error = %e, "Error pulling message");
                        continue;
                    }
                };

                let envelope = match serde_json::from_slice::<EventEnvelope>(&message.payload) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!(consumer_name, error = %e, "Dead-lettering undecodable event");
                        Self::dead_letter(&client, &subject, &message.payload).await;
                        let _ = message.ack().await;
                        continue;
                    }
                };

                match handler.handle(envelope).await {
                    Ok(()) => {
                        if let Err(e) = message.ack().await {
                            warn!(consumer_name, error = %e, "Failed to ack message");
                        }
                    }
                    Err(e) => {
                        let delivered = message
                            .info()
                            .map(|info| info.delivered)
                            .unwrap_or(MAX_DELIVER);
                        if delivered >= MAX_DELIVER {
                            error!(
                                consumer_name,
                                error = %e,
                                delivered,
                                "Handler failed on final delivery, dead-lettering"
                            );
                            Self::dead_letter(&client, &subject, &message.payload).await;
                            let _ = message.ack().await;
                        } else {
                            warn!(
                                consumer_name,
                                error = %e,
                                delivered,
                                "Handler failed, leaving message for redelivery"
                            );
                            // No ack: JetStream redelivers after ack_wait.
                        }
                    }
                }
            }
        })
    }

    async fn dead_letter(client: &async_nats::Client, subject: &str, payload: &[u8]) {
        let dlq_subject = subject.replacen(EVENT_SUBJECT_ROOT, DLQ_SUBJECT_ROOT, 1);
        if let Err(e) = client.publish(dlq_subject.clone(), payload.to_vec().into()).await {
            error!(dlq_subject, error = %e, "Failed to publish to dead-letter subject");
        }
    }
}

#[async_trait]
impl EventBus for NatsEventBus {
    async fn publish(&self, envelope: &EventEnvelope) -> Result<()> {
        let payload = serde_json::to_vec(envelope)?;
        let subject = envelope.subject();
        self.client
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| bus_err("Failed to publish event", e))?;
        debug!(subject, event_id = %envelope.event_id, "Published event");
        Ok(())
    }

    async fn subscribe_durable(
        &self,
        consumer_name: &str,
        subject: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<()> {
        let consumer = self.ensure_consumer(consumer_name, subject).await?;
        let cancel = CancellationToken::new();
        let handle = Self::spawn_consumer_task(
            consumer_name.to_owned(),
            subject.to_owned(),
            consumer,
            Arc::clone(&handler),
            self.client.clone(),
            cancel.clone(),
        );

        self.subscriptions.lock().await.push(Subscription {
            consumer_name: consumer_name.to_owned(),
            subject: subject.to_owned(),
            handler,
            cancel,
            handle,
        });
        info!(consumer_name, subject, "Durable subscription active");
        Ok(())
    }

    async fn check_subscription_health(&self) -> Result<Vec<SubscriptionHealth>> {
        let mut subscriptions = self.subscriptions.lock().await;
        let mut report = Vec::with_capacity(subscriptions.len());

        for subscription in subscriptions.iter_mut() {
            let consumer_alive = self
                .stream
                .consumer_info(&subscription.consumer_name)
                .await
                .is_ok();
            let task_alive = !subscription.handle.is_finished();

            let healthy = if consumer_alive && task_alive {
                true
            } else {
                warn!(
                    consumer_name = subscription.consumer_name,
                    consumer_alive, task_alive, "Subscription unhealthy, re-subscribing"
                );
                subscription.cancel.cancel();
                subscription.handle.abort();

                match self
                    .ensure_consumer(&subscription.consumer_name, &subscription.subject)
                    .await
                {
                    Ok(consumer) => {
                        let cancel = CancellationToken::new();
                        subscription.handle = Self::spawn_consumer_task(
                            subscription.consumer_name.clone(),
                            subscription.subject.clone(),
                            consumer,
                            Arc::clone(&subscription.handler),
                            self.client.clone(),
                            cancel.clone(),
                        );
                        subscription.cancel = cancel;
                        true
                    }
                    Err(e) => {
                        error!(
                            consumer_name = subscription.consumer_name,
                            error = %e,
                            "Failed to re-subscribe"
                        );
                        false
                    }
                }
            };

            report.push(SubscriptionHealth {
                consumer_name: subscription.consumer_name.clone(),
                subject: subscription.subject.clone(),
                healthy,
            });
        }
        Ok(report)
    }

    async fn stop(&self) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock().await;
        for subscription in subscriptions.drain(..) {
            subscription.cancel.cancel();
            subscription.handle.abort();
        }
        Ok(())
    }
}
