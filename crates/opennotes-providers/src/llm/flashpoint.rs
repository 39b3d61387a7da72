//! Flashpoint detector over a chat-completions endpoint.
//!
//! The prompt may be replaced by an optimized artifact produced offline;
//! the artifact is an opaque JSON blob loaded at startup, and the base
//! prompt is used when it is missing. The detector is a process-wide
//! singleton initialized lazily.

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use opennotes_domain::error::{Error, Result};
use opennotes_domain::events::BulkScanMessage;
use opennotes_domain::ports::{FlashpointDetector, FlashpointVerdict};

const BASE_PROMPT: &str = "You analyze chat conversations for early warning signs that a \
thread may derail into conflict. Given the recent context and the current message, decide \
whether the current message is a flashpoint. Respond with JSON: \
{\"will_derail\": bool, \"confidence\": number between 0 and 1, \"reasoning\": string}.";

static DETECTOR: OnceCell<Arc<LlmFlashpointDetector>> = OnceCell::new();

/// Get or initialize the process-wide detector.
///
/// `OnceCell::get_or_try_init` gives the double-checked locking the
/// original implementation hand-rolled.
pub fn global_flashpoint_detector(
    api_base: &str,
    api_key: &str,
    model: &str,
    artifact_path: Option<&Path>,
) -> Result<Arc<LlmFlashpointDetector>> {
    DETECTOR
        .get_or_try_init(|| {
            LlmFlashpointDetector::new(api_base, api_key, model, artifact_path).map(Arc::new)
        })
        .cloned()
}

#[derive(Deserialize)]
struct PromptArtifact {
    /// Optimized system prompt text.
    prompt: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct DetectorOutput {
    will_derail: bool,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

/// Chat-completions-backed flashpoint detector.
pub struct LlmFlashpointDetector {
    http: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    system_prompt: String,
}

impl LlmFlashpointDetector {
    /// # Errors
    ///
    /// `Error::Config` when the HTTP client cannot be built. A missing or
    /// unreadable artifact is not an error; the base prompt is used.
    pub fn new(
        api_base: &str,
        api_key: &str,
        model: &str,
        artifact_path: Option<&Path>,
    ) -> Result<Self> {
        let system_prompt = artifact_path
            .and_then(|path| match std::fs::read_to_string(path) {
                Ok(raw) => match serde_json::from_str::<PromptArtifact>(&raw) {
                    Ok(artifact) => {
                        info!(path = %path.display(), "Loaded optimized flashpoint detector");
                        Some(artifact.prompt)
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Ignoring malformed detector artifact");
                        None
                    }
                },
                Err(_) => {
                    info!(
                        expected_path = %path.display(),
                        "Using base flashpoint detector (optimized artifact not found)"
                    );
                    None
                }
            })
            .unwrap_or_else(|| BASE_PROMPT.to_owned());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_owned(),
            api_key: api_key.to_owned(),
            model: model.to_owned(),
            system_prompt,
        })
    }

    fn render_user_prompt(context: &[BulkScanMessage], message: &BulkScanMessage) -> String {
        let mut prompt = String::from("Recent context:\n");
        if context.is_empty() {
            prompt.push_str("(none)\n");
        }
        for msg in context {
            prompt.push_str(&format!("<{}> {}\n", msg.author_id, msg.content));
        }
        prompt.push_str(&format!(
            "\nCurrent message:\n<{}> {}\n",
            message.author_id, message.content
        ));
        prompt
    }
}

#[async_trait]
impl FlashpointDetector for LlmFlashpointDetector {
    async fn detect(
        &self,
        context: &[BulkScanMessage],
        message: &BulkScanMessage,
    ) -> Result<FlashpointVerdict> {
        let response = self
            .http
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "messages": [
                    {"role": "system", "content": self.system_prompt},
                    {"role": "user", "content": Self::render_user_prompt(context, message)},
                ],
                "response_format": {"type": "json_object"},
            }))
            .send()
            .await
            .map_err(|e| Error::upstream_with_source("Flashpoint request failed", e))?;

        if !response.status().is_success() {
            return Err(Error::upstream(format!(
                "Flashpoint provider returned {}",
                response.status()
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::upstream(format!("Undecodable flashpoint response: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| Error::upstream("Flashpoint response contained no choices"))?;

        // A model that answers off-format is a transient condition, not a
        // flashpoint.
        match serde_json::from_str::<DetectorOutput>(&content) {
            Ok(output) => Ok(FlashpointVerdict {
                will_derail: output.will_derail,
                confidence: output.confidence.clamp(0.0, 1.0),
                reasoning: output.reasoning,
            }),
            Err(e) => {
                warn!(error = %e, "Flashpoint output was not valid JSON, assuming no flashpoint");
                Ok(FlashpointVerdict {
                    will_derail: false,
                    confidence: 0.0,
                    reasoning: String::new(),
                })
            }
        }
    }
}
