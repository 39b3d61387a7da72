//! Redis cache provider.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use opennotes_domain::error::{Error, Result};
use opennotes_domain::ports::cache::{CacheProvider, CacheSubscriptionHandler};

fn cache_err(context: &str, e: redis::RedisError) -> Error {
    Error::cache(format!("{context}: {e}"))
}

struct SubscriptionTask {
    channel: String,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Cache provider over a Redis connection manager.
///
/// The connection manager reconnects transparently; per-call clones are
/// cheap. Pub/sub subscriptions each own a dedicated connection and a
/// tracked background task so [`CacheProvider::stop`] can cancel them all
/// without leaks.
pub struct RedisCacheProvider {
    client: Client,
    manager: ConnectionManager,
    subscriptions: Mutex<Vec<SubscriptionTask>>,
}

impl RedisCacheProvider {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// `Error::Cache` when the URL is malformed or the server unreachable.
    pub async fn connect(url: &str) -> Result<Self> {
        let client =
            Client::open(url).map_err(|e| cache_err("Invalid Redis URL", e))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| cache_err("Failed to connect to Redis", e))?;
        info!("Connected to Redis");
        Ok(Self {
            client,
            manager,
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.manager.clone()
    }
}

#[async_trait]
impl CacheProvider for RedisCacheProvider {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut con = self.conn();
        con.get(key).await.map_err(|e| cache_err("GET failed", e))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut con = self.conn();
        match ttl {
            Some(ttl) => con
                .set_ex(key, value, ttl.as_secs().max(1))
                .await
                .map_err(|e| cache_err("SETEX failed", e)),
            None => con.set(key, value).await.map_err(|e| cache_err("SET failed", e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut con = self.conn();
        let removed: i64 = con.del(key).await.map_err(|e| cache_err("DEL failed", e))?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut con = self.conn();
        con.exists(key).await.map_err(|e| cache_err("EXISTS failed", e))
    }

    async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let mut con = self.conn();
        con.keys(pattern).await.map_err(|e| cache_err("KEYS failed", e))
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut con = self.conn();
        let mut cmd = redis::cmd("MGET");
        for key in keys {
            cmd.arg(key);
        }
        cmd.query_async(&mut con)
            .await
            .map_err(|e| cache_err("MGET failed", e))
    }

    async fn hincrby(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let mut con = self.conn();
        con.hincr(key, field, delta)
            .await
            .map_err(|e| cache_err("HINCRBY failed", e))
    }

    async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>> {
        let mut con = self.conn();
        con.hgetall(key).await.map_err(|e| cache_err("HGETALL failed", e))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut con = self.conn();
        con.hset::<_, _, _, ()>(key, field, value)
            .await
            .map_err(|e| cache_err("HSET failed", e))
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut con = self.conn();
        con.expire::<_, ()>(key, ttl.as_secs().max(1) as i64)
            .await
            .map_err(|e| cache_err("EXPIRE failed", e))
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut con = self.conn();
        con.sadd::<_, _, ()>(key, member)
            .await
            .map_err(|e| cache_err("SADD failed", e))
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut con = self.conn();
        con.srem::<_, _, ()>(key, member)
            .await
            .map_err(|e| cache_err("SREM failed", e))
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut con = self.conn();
        con.smembers(key).await.map_err(|e| cache_err("SMEMBERS failed", e))
    }

    async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut con = self.conn();
        con.publish::<_, _, ()>(channel, message)
            .await
            .map_err(|e| cache_err("PUBLISH failed", e))
    }

    async fn subscribe(&self, channel: &str, handler: CacheSubscriptionHandler) -> Result<()> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| cache_err("Failed to open pub/sub connection", e))?;
        pubsub
            .subscribe(channel)
            .await
            .map_err(|e| cache_err("SUBSCRIBE failed", e))?;

        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task_channel = channel.to_owned();
        let handle = tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();
            loop {
                tokio::select! {
                    () = task_cancel.cancelled() => {
                        debug!(channel = task_channel, "Subscription cancelled");
                        return;
                    }
                    message = stream.next() => {
                        let Some(message) = message else {
                            warn!(channel = task_channel, "Pub/sub stream closed");
                            return;
                        };
                        match message.get_payload::<String>() {
                            Ok(payload) => handler(payload).await,
                            Err(e) => warn!(
                                channel = task_channel,
                                error = %e,
                                "Dropping undecodable pub/sub payload"
                            ),
                        }
                    }
                }
            }
        });

        self.subscriptions.lock().await.push(SubscriptionTask {
            channel: channel.to_owned(),
            cancel,
            handle,
        });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock().await;
        let count = subscriptions.len();
        for task in subscriptions.drain(..) {
            task.cancel.cancel();
            // Cancellation is cooperative; abort as a backstop.
            task.handle.abort();
            debug!(channel = task.channel, "Stopped subscription task");
        }
        if count > 0 {
            info!(count, "Stopped cache subscriptions");
        }
        Ok(())
    }
}

/// Shared handle used across services.
pub type SharedCache = Arc<dyn CacheProvider>;
