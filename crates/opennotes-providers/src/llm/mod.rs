//! HTTP-backed LLM providers: embeddings, moderation, flashpoint detection.

mod embedding;
mod flashpoint;
mod moderation;

pub use embedding::HttpEmbeddingProvider;
pub use flashpoint::{LlmFlashpointDetector, global_flashpoint_detector};
pub use moderation::HttpModerationProvider;
