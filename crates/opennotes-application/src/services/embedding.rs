//! Embedding pipeline: token-bucket gated, cache-backed embedding lookup.
//!
//! Every embedding call draws a weight from the shared `llm` pool so
//! concurrent workers across processes respect the provider's capacity.
//! Results are cached by a hash of (text, provider, model); provider
//! rate-limit errors release tokens promptly and retry with exponential
//! backoff plus jitter.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use xxhash_rust::xxh3::xxh3_64;

use opennotes_domain::constants::EMBEDDING_CACHE_KEY_PREFIX;
use opennotes_domain::error::{Error, Result};
use opennotes_domain::ports::{CacheProvider, EmbeddingProvider, TokenBucketRepository};

/// Name of the shared LLM capacity pool.
pub const LLM_POOL: &str = "llm";

/// Weight one embedding call takes from the pool.
const EMBED_WEIGHT: i64 = 1;

/// Cached embeddings expire after a week; re-embedding identical text is
/// deterministic anyway.
const EMBEDDING_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 3600);

const MAX_ATTEMPTS: u32 = 5;
const BASE_BACKOFF_MS: u64 = 500;
const ACQUIRE_POLL_MS: u64 = 250;
const MAX_ACQUIRE_POLLS: u32 = 240;

/// Token-bucket gated embedding lookup with cache.
pub struct EmbeddingPipeline {
    provider: Arc<dyn EmbeddingProvider>,
    cache: Arc<dyn CacheProvider>,
    token_bucket: Arc<dyn TokenBucketRepository>,
}

impl EmbeddingPipeline {
    #[must_use]
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        cache: Arc<dyn CacheProvider>,
        token_bucket: Arc<dyn TokenBucketRepository>,
    ) -> Self {
        Self {
            provider,
            cache,
            token_bucket,
        }
    }

    fn cache_key(&self, text: &str) -> String {
        let digest = xxh3_64(
            format!(
                "{}:{}:{text}",
                self.provider.provider_name(),
                self.provider.model_name()
            )
            .as_bytes(),
        );
        format!("{EMBEDDING_CACHE_KEY_PREFIX}{digest:016x}")
    }

    /// Embedding dimensionality of the configured provider.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Provider name for provenance columns.
    #[must_use]
    pub fn provider_name(&self) -> &str {
        self.provider.provider_name()
    }

    /// Model name for provenance columns.
    #[must_use]
    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed `text`, consulting the cache first.
    ///
    /// `workflow_id` identifies the owning workflow execution for the token
    /// hold so crash cleanup can reclaim it.
    pub async fn embed(&self, text: &str, workflow_id: &str) -> Result<Vec<f32>> {
        let key = self.cache_key(text);
        match self.cache.get(&key).await {
            Ok(Some(cached)) => {
                if let Ok(embedding) = serde_json::from_str::<Vec<f32>>(&cached) {
                    debug!(key, "Embedding cache hit");
                    return Ok(embedding);
                }
                warn!(key, "Discarding undecodable cached embedding");
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Embedding cache read failed, calling provider"),
        }

        self.acquire_tokens(workflow_id).await?;
        let result = self.embed_with_backoff(text, workflow_id).await;
        let released = self.token_bucket.release(LLM_POOL, workflow_id).await?;
        if !released {
            warn!(workflow_id, "No open token hold to release");
        }
        let embedding = result?;

        if let Err(e) = self
            .cache
            .set(
                &key,
                &serde_json::to_string(&embedding)?,
                Some(EMBEDDING_CACHE_TTL),
            )
            .await
        {
            warn!(error = %e, "Failed to cache embedding");
        }
        Ok(embedding)
    }

    /// Poll the pool until a weight is granted.
    async fn acquire_tokens(&self, workflow_id: &str) -> Result<()> {
        for _ in 0..MAX_ACQUIRE_POLLS {
            if self
                .token_bucket
                .try_acquire(LLM_POOL, EMBED_WEIGHT, workflow_id)
                .await?
            {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(ACQUIRE_POLL_MS)).await;
        }
        Err(Error::upstream(format!(
            "Timed out waiting for capacity on pool '{LLM_POOL}'"
        )))
    }

    async fn embed_with_backoff(&self, text: &str, workflow_id: &str) -> Result<Vec<f32>> {
        let mut attempt = 0u32;
        loop {
            match self.provider.embed(text).await {
                Ok(embedding) => return Ok(embedding),
                Err(Error::ProviderRateLimited { message }) if attempt + 1 < MAX_ATTEMPTS => {
                    // Give the tokens back while we wait so other workers
                    // are not starved by our backoff.
                    self.token_bucket.release(LLM_POOL, workflow_id).await?;
                    let backoff = backoff_with_jitter(attempt);
                    warn!(
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        message,
                        "Provider rate limited, rescheduling embedding"
                    );
                    tokio::time::sleep(backoff).await;
                    self.acquire_tokens(workflow_id).await?;
                    attempt += 1;
                }
                Err(e) if e.is_transient() && attempt + 1 < MAX_ATTEMPTS => {
                    let backoff = backoff_with_jitter(attempt);
                    warn!(attempt, error = %e, "Transient embedding error, retrying");
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Exponential backoff with up to 25% random jitter.
fn backoff_with_jitter(attempt: u32) -> Duration {
    let base = BASE_BACKOFF_MS.saturating_mul(1u64 << attempt.min(8));
    let jitter = rand::thread_rng().gen_range(0..=base / 4);
    Duration::from_millis(base + jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        let b0 = BASE_BACKOFF_MS;
        let b2 = BASE_BACKOFF_MS * 4;
        assert!(backoff_with_jitter(0).as_millis() as u64 >= b0);
        assert!(backoff_with_jitter(0).as_millis() as u64 <= b0 + b0 / 4);
        assert!(backoff_with_jitter(2).as_millis() as u64 >= b2);
    }
}
