//! Configuration data structures.
//!
//! Every component reads one [`AppConfig`], deserialized from the
//! `settings:` section of `config/{env}.yaml` with environment-variable
//! overrides applied on top.

use serde::{Deserialize, Serialize};

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Production,
}

impl Environment {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Test => "test",
            Self::Production => "production",
        }
    }

    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_owned(),
            port: 8000,
        }
    }
}

/// JWT and session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret_key: String,
    pub jwt_algorithm: String,
    pub access_token_expire_minutes: u64,
    pub refresh_token_expire_days: u64,
    /// Tokens older than this are rejected regardless of `exp`.
    pub max_token_age_seconds: u64,
    pub session_ttl: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret_key: String::new(),
            jwt_algorithm: "HS256".to_owned(),
            access_token_expire_minutes: 30,
            refresh_token_expire_days: 7,
            max_token_age_seconds: 86_400,
            session_ttl: 3600,
        }
    }
}

/// Circuit breaker defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    /// Seconds in OPEN before the half-open probe.
    pub timeout: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: 60,
        }
    }
}

/// Subscription health-check settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    pub heartbeat_interval: u64,
    pub unhealthy_timeout: u64,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: 30,
            unhealthy_timeout: 120,
        }
    }
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
    /// Per-call timeout in seconds.
    pub timeout_seconds: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_owned(),
            api_key: String::new(),
            model: "text-embedding-3-small".to_owned(),
            dimensions: 1536,
            timeout_seconds: 30,
        }
    }
}

/// Sliding-window rate limits applied by the HTTP surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub requests_per_window: u64,
    pub window_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 60,
            window_seconds: 60,
        }
    }
}

/// Maintenance scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// Weekly stale job sweep (Sunday midnight UTC).
    pub stale_sweep_cron: String,
    pub stale_threshold_hours: i64,
    /// Six-hourly stuck job monitor.
    pub stuck_monitor_cron: String,
    pub stuck_threshold_minutes: i64,
    /// Hourly token hold reclaimer.
    pub token_reclaim_cron: String,
    pub token_reclaim_after_minutes: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_sweep_cron: "0 0 0 * * SUN".to_owned(),
            stale_threshold_hours: 24,
            stuck_monitor_cron: "0 0 */6 * * *".to_owned(),
            stuck_threshold_minutes: 60,
            token_reclaim_cron: "0 15 * * * *".to_owned(),
            token_reclaim_after_minutes: 30,
        }
    }
}

/// LLM token-bucket pool bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPoolConfig {
    pub name: String,
    pub capacity: i64,
}

impl Default for TokenPoolConfig {
    fn default() -> Self {
        Self {
            name: "llm".to_owned(),
            capacity: 10,
        }
    }
}

/// Webhook verification settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Ed25519 platform key, exactly 64 hex characters when set.
    pub discord_public_key: String,
    /// HMAC timestamps older than this (or in the future) are rejected.
    pub max_webhook_age_seconds: i64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            discord_public_key: String::new(),
            max_webhook_age_seconds: 300,
        }
    }
}

/// The single settings object every component reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub environment: Environment,
    pub database_url: String,
    pub redis_url: String,
    pub nats_url: String,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub health_check: HealthCheckConfig,
    pub embedding: EmbeddingConfig,
    pub rate_limit: RateLimitConfig,
    pub scheduler: SchedulerConfig,
    pub token_pool: TokenPoolConfig,
    pub webhooks: WebhookConfig,
    /// Fernet-style key for the encrypted JSON column (base64, 32 bytes).
    pub credentials_encryption_key: String,
    pub vision_max_tokens: u32,
    pub min_ratings_needed: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            database_url: "postgres://localhost/opennotes".to_owned(),
            redis_url: "redis://localhost:6379".to_owned(),
            nats_url: "nats://localhost:4222".to_owned(),
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            health_check: HealthCheckConfig::default(),
            embedding: EmbeddingConfig::default(),
            rate_limit: RateLimitConfig::default(),
            scheduler: SchedulerConfig::default(),
            token_pool: TokenPoolConfig::default(),
            webhooks: WebhookConfig::default(),
            credentials_encryption_key: String::new(),
            vision_max_tokens: 1024,
            min_ratings_needed: 5,
        }
    }
}
