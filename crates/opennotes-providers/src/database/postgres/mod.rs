//! Postgres adapter internals.

mod audit;
mod batch_jobs;
mod chunks;
mod community_servers;
mod fact_checks;
mod notes;
mod previously_seen;
mod token_bucket;
mod workflows;

pub use audit::PgAuditRepository;
pub use batch_jobs::PgBatchJobRepository;
pub use chunks::PgChunkRepository;
pub use community_servers::PgCommunityServerRepository;
pub use fact_checks::PgFactCheckRepository;
pub use notes::{PgNoteRepository, PgScoringDataProvider};
pub use previously_seen::PgPreviouslySeenRepository;
pub use token_bucket::PgTokenBucketRepository;
pub use workflows::PgWorkflowRepository;

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

use opennotes_domain::error::{Error, Result};

/// Map any sqlx error into the domain database error, preserving SQLSTATE
/// in the message so the deadlock retry can classify it.
pub fn db_err(context: &str, e: sqlx::Error) -> Error {
    let sqlstate = match &e {
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| format!(" (SQLSTATE {code})"))
            .unwrap_or_default(),
        _ => String::new(),
    };
    Error::database_with_source(format!("{context}{sqlstate}"), e)
}

/// Open the connection pool.
pub async fn connect_pool(database_url: &str, max_connections: u32) -> Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .map_err(|e| db_err("Failed to connect to PostgreSQL", e))
}
