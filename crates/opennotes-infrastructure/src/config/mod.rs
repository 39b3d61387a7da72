//! Application configuration.

mod data;
mod loader;

pub use data::{
    AppConfig, AuthConfig, CircuitBreakerConfig, EmbeddingConfig, Environment, HealthCheckConfig,
    RateLimitConfig, SchedulerConfig, ServerConfig, TokenPoolConfig, WebhookConfig,
};
pub use loader::ConfigLoader;
