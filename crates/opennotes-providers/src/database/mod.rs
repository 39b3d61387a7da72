//! PostgreSQL repositories over sqlx and pgvector.

mod postgres;

pub use postgres::{
    PgAuditRepository, PgBatchJobRepository, PgChunkRepository, PgCommunityServerRepository,
    PgFactCheckRepository, PgNoteRepository, PgPreviouslySeenRepository, PgScoringDataProvider,
    PgTokenBucketRepository, PgWorkflowRepository, connect_pool, db_err,
};
