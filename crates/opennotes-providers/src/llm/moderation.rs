//! OpenAI-compatible moderation provider.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use opennotes_domain::error::{Error, Result};
use opennotes_domain::ports::{ModerationProvider, ModerationVerdict};

#[derive(Deserialize)]
struct ModerationResponse {
    results: Vec<ModerationResult>,
}

#[derive(Deserialize)]
struct ModerationResult {
    flagged: bool,
    #[serde(default)]
    categories: BTreeMap<String, bool>,
}

/// Moderation over an OpenAI-compatible `/moderations` endpoint.
pub struct HttpModerationProvider {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
}

impl HttpModerationProvider {
    /// # Errors
    ///
    /// `Error::Config` when the HTTP client cannot be built.
    pub fn new(api_base: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_owned(),
            api_key: api_key.to_owned(),
        })
    }
}

#[async_trait]
impl ModerationProvider for HttpModerationProvider {
    async fn moderate(&self, content: &str) -> Result<ModerationVerdict> {
        let response = self
            .http
            .post(format!("{}/moderations", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "input": content }))
            .send()
            .await
            .map_err(|e| Error::upstream_with_source("Moderation request failed", e))?;

        if !response.status().is_success() {
            return Err(Error::upstream(format!(
                "Moderation provider returned {}",
                response.status()
            )));
        }

        let parsed: ModerationResponse = response
            .json()
            .await
            .map_err(|e| Error::upstream(format!("Undecodable moderation response: {e}")))?;
        let result = parsed
            .results
            .into_iter()
            .next()
            .ok_or_else(|| Error::upstream("Moderation response contained no results"))?;

        Ok(ModerationVerdict {
            flagged: result.flagged,
            categories: result
                .categories
                .into_iter()
                .filter_map(|(name, hit)| hit.then_some(name))
                .collect(),
        })
    }
}
