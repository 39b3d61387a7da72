//! Shared key prefixes and tunables used across layers.

/// Cache key prefix for real-time batch job progress hashes.
pub const BATCH_JOB_PROGRESS_KEY_PREFIX: &str = "batch_job:progress:";

/// TTL for progress entries after the last update.
pub const BATCH_JOB_PROGRESS_TTL_SECS: u64 = 3600;

/// Prefix for rechunk mutual-exclusion locks.
pub const RECHUNK_LOCK_PREFIX: &str = "rechunk:lock";

/// Default TTL for rechunk locks. Long enough for a typical rechunk run,
/// short enough to recover from a crashed worker without manual cleanup.
pub const RECHUNK_LOCK_TTL_SECS: u64 = 1800;

/// Global fusion weight key.
pub const DEFAULT_ALPHA_KEY: &str = "search:fusion:default_alpha";

/// Per-dataset fusion weight key prefix.
pub const DATASET_ALPHA_KEY_PREFIX: &str = "search:fusion:alpha:";

/// Fallback fusion weight when nothing is cached. Semantic-weighted.
pub const FALLBACK_ALPHA: f64 = 0.7;

/// Key prefix for session blobs.
pub const SESSION_KEY_PREFIX: &str = "session";

/// Key prefix for sliding-window rate limiter sorted sets.
pub const RATE_LIMIT_KEY_PREFIX: &str = "rate_limit:";

/// Key prefix for cached embeddings.
pub const EMBEDDING_CACHE_KEY_PREFIX: &str = "embedding:";

/// Subject root for all bus events.
pub const EVENT_SUBJECT_ROOT: &str = "OPENNOTES";

/// Subject root for dead-lettered events.
pub const DLQ_SUBJECT_ROOT: &str = "OPENNOTES.dlq";

/// Default note-count threshold that makes a community eligible for batch scoring.
pub const BATCH_SCORING_THRESHOLD: u64 = 200;

/// Hours without update after which a non-terminal job is swept to FAILED.
pub const DEFAULT_STALE_JOB_THRESHOLD_HOURS: i64 = 24;

/// Minutes without update after which a non-terminal job is reported as stuck.
pub const DEFAULT_STUCK_JOB_THRESHOLD_MINUTES: i64 = 60;
