//! Error handling types

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for operations that can fail
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for OpenNotes-Server
///
/// Variants map 1:1 onto the HTTP taxonomy at the transport boundary:
/// `NotFound` → 404, `Forbidden` → 403, `Conflict`/`ActiveJobExists` → 409,
/// `Validation` → 400/422, `RateLimited` → 429, `CircuitOpen`/`Upstream` →
/// 503, everything else → 500.
#[derive(Error, Debug)]
pub enum Error {
    /// Target entity absent
    #[error("Not found: {resource}")]
    NotFound {
        /// The resource that was not found
        resource: String,
    },

    /// Permission denied
    #[error("Forbidden: {message}")]
    Forbidden {
        /// Why the caller may not perform the operation
        message: String,
    },

    /// Terminal state, duplicate resource, or otherwise conflicting request
    #[error("Conflict: {message}")]
    Conflict {
        /// Description of the conflicting state
        message: String,
    },

    /// An active batch job already exists for the requested (job_type, resource)
    #[error("Active job already exists: {job_id}")]
    ActiveJobExists {
        /// Id of the conflicting job
        job_id: Uuid,
    },

    /// Malformed or semantically invalid input
    #[error("Validation error: {message}")]
    Validation {
        /// Description of the invalid input
        message: String,
    },

    /// Throttled by the sliding-window rate limiter
    #[error("Rate limited, retry after {retry_after}s")]
    RateLimited {
        /// Seconds until the window frees up
        retry_after: u64,
    },

    /// Timeout or 5xx from a dependency; retried with backoff by callers
    #[error("Upstream error: {message}")]
    Upstream {
        /// Description of the upstream failure
        message: String,
        /// Optional source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Circuit breaker refused the call without exercising the dependency
    #[error("Circuit breaker '{name}' is open after {failures} failures, retry in {retry_in_secs}s")]
    CircuitOpen {
        /// Breaker name
        name: String,
        /// Consecutive failure count that opened the breaker
        failures: u32,
        /// Seconds until the breaker attempts a half-open probe
        retry_in_secs: u64,
    },

    /// Database-related error
    #[error("Database error: {message}")]
    Database {
        /// Description of the database error
        message: String,
        /// Optional source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Cache backend error
    #[error("Cache error: {message}")]
    Cache {
        /// Description of the cache error
        message: String,
    },

    /// Event bus error
    #[error("Event bus error: {message}")]
    EventBus {
        /// Description of the event bus error
        message: String,
        /// Optional source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Embedding provider operation error
    #[error("Embedding provider error: {message}")]
    Embedding {
        /// Description of the embedding provider error
        message: String,
    },

    /// Embedding/LLM provider throttled us; release tokens and reschedule
    #[error("Provider rate limited: {message}")]
    ProviderRateLimited {
        /// Description from the provider
        message: String,
    },

    /// Scoring subsystem error
    #[error("Scoring error: {message}")]
    Scoring {
        /// Description of the scoring error
        message: String,
    },

    /// Configuration-related error
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error
        message: String,
    },

    /// Missing configuration field
    #[error("Missing configuration: {0}")]
    ConfigMissing(String),

    /// Invalid configuration value
    #[error("Invalid configuration for '{key}': {message}")]
    ConfigInvalid {
        /// The configuration key that is invalid
        key: String,
        /// Reason why it is invalid
        message: String,
    },

    /// Cryptographic operation error (signatures, token decode, column codec)
    #[error("Crypto error: {message}")]
    Crypto {
        /// Description of the crypto error
        message: String,
    },

    /// JSON parsing or serialization error
    #[error("JSON error: {source}")]
    Json {
        /// The underlying JSON error
        #[from]
        source: serde_json::Error,
    },

    /// Invariant violation; caller sees 500, incident logged
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error
        message: String,
    },
}

impl Error {
    /// Create a not found error
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create a forbidden error
    pub fn forbidden<S: Into<String>>(message: S) -> Self {
        Self::Forbidden {
            message: message.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict<S: Into<String>>(message: S) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an upstream error
    pub fn upstream<S: Into<String>>(message: S) -> Self {
        Self::Upstream {
            message: message.into(),
            source: None,
        }
    }

    /// Create an upstream error with source
    pub fn upstream_with_source<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        message: S,
        source: E,
    ) -> Self {
        Self::Upstream {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a database error
    pub fn database<S: Into<String>>(message: S) -> Self {
        Self::Database {
            message: message.into(),
            source: None,
        }
    }

    /// Create a database error with source
    pub fn database_with_source<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        message: S,
        source: E,
    ) -> Self {
        Self::Database {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a cache error
    pub fn cache<S: Into<String>>(message: S) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Create an event bus error
    pub fn event_bus<S: Into<String>>(message: S) -> Self {
        Self::EventBus {
            message: message.into(),
            source: None,
        }
    }

    /// Create an event bus error with source
    pub fn event_bus_with_source<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
        message: S,
        source: E,
    ) -> Self {
        Self::EventBus {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create an embedding provider error
    pub fn embedding<S: Into<String>>(message: S) -> Self {
        Self::Embedding {
            message: message.into(),
        }
    }

    /// Create a scoring error
    pub fn scoring<S: Into<String>>(message: S) -> Self {
        Self::Scoring {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a crypto error
    pub fn crypto<S: Into<String>>(message: S) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether the error is transient and the operation may be retried.
    ///
    /// Workflow steps use this to decide between retry and immediate failure.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Upstream { .. }
                | Self::ProviderRateLimited { .. }
                | Self::EventBus { .. }
                | Self::Cache { .. }
        )
    }
}
