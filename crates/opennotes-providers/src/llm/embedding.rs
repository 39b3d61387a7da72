//! OpenAI-compatible embedding provider.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use opennotes_domain::error::{Error, Result};
use opennotes_domain::ports::EmbeddingProvider;
use opennotes_infrastructure::circuit_breaker::CircuitBreaker;
use opennotes_infrastructure::config::EmbeddingConfig;

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Embeddings over any OpenAI-compatible `/embeddings` endpoint.
///
/// Calls are gated by a circuit breaker: while the provider is failing the
/// breaker refuses without exercising the endpoint.
pub struct HttpEmbeddingProvider {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    dimensions: usize,
    breaker: Arc<CircuitBreaker>,
}

impl HttpEmbeddingProvider {
    /// # Errors
    ///
    /// `Error::Config` when the HTTP client cannot be built.
    pub fn new(config: &EmbeddingConfig, breaker: Arc<CircuitBreaker>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_owned(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            dimensions: config.dimensions,
            breaker,
        })
    }

    async fn call_provider(&self, text: &str) -> Result<Vec<f32>> {
        let response = self
            .http
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "input": text,
            }))
            .send()
            .await
            .map_err(|e| Error::upstream_with_source("Embedding request failed", e))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ProviderRateLimited { message: body });
        }
        if status.is_server_error() {
            return Err(Error::upstream(format!(
                "Embedding provider returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(Error::embedding(format!(
                "Embedding provider returned {status}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::embedding(format!("Undecodable embedding response: {e}")))?;
        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::embedding("Embedding response contained no data"))?;

        if embedding.len() != self.dimensions {
            return Err(Error::embedding(format!(
                "Expected {} dimensions, got {}",
                self.dimensions,
                embedding.len()
            )));
        }
        Ok(embedding)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.breaker.check()?;
        match self.call_provider(text).await {
            Ok(embedding) => {
                self.breaker.record_success();
                Ok(embedding)
            }
            // Rate limiting is backpressure, not a provider failure; it
            // must not open the breaker.
            Err(e @ Error::ProviderRateLimited { .. }) => Err(e),
            Err(e) => {
                self.breaker.record_failure();
                Err(e)
            }
        }
    }

    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
