//! Community server repository.

use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::PgPool;
use uuid::Uuid;

use opennotes_domain::entities::CommunityServer;
use opennotes_domain::error::{Error, Result};
use opennotes_domain::ports::CommunityServerRepository;

use super::db_err;

/// sqlx-backed community server storage.
pub struct PgCommunityServerRepository {
    pool: PgPool,
}

impl PgCommunityServerRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_server(row: &sqlx::postgres::PgRow) -> Result<CommunityServer> {
        Ok(CommunityServer {
            id: row.try_get("id").map_err(|e| db_err("read id", e))?,
            platform: row.try_get("platform").map_err(|e| db_err("read platform", e))?,
            platform_community_server_id: row
                .try_get("platform_community_server_id")
                .map_err(|e| db_err("read platform_community_server_id", e))?,
            name: row.try_get("name").map_err(|e| db_err("read name", e))?,
            is_active: row.try_get("is_active").map_err(|e| db_err("read is_active", e))?,
            welcome_message: row
                .try_get("welcome_message")
                .map_err(|e| db_err("read welcome_message", e))?,
            vibecheck_debug_mode: row
                .try_get("vibecheck_debug_mode")
                .map_err(|e| db_err("read vibecheck_debug_mode", e))?,
            created_at: row.try_get("created_at").map_err(|e| db_err("read created_at", e))?,
            updated_at: row.try_get("updated_at").map_err(|e| db_err("read updated_at", e))?,
        })
    }
}

const COLUMNS: &str = "id, platform, platform_community_server_id, name, is_active, \
                       welcome_message, vibecheck_debug_mode, created_at, updated_at";

#[async_trait]
impl CommunityServerRepository for PgCommunityServerRepository {
    async fn get(&self, id: Uuid) -> Result<Option<CommunityServer>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM community_servers WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to load community server", e))?;
        row.as_ref().map(Self::row_to_server).transpose()
    }

    async fn get_by_platform_id(&self, platform_id: &str) -> Result<Option<CommunityServer>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM community_servers WHERE platform_community_server_id = $1"
        ))
        .bind(platform_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to load community server by platform id", e))?;
        row.as_ref().map(Self::row_to_server).transpose()
    }

    async fn set_welcome_message(&self, id: Uuid, message: Option<String>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE community_servers SET welcome_message = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(message)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to update welcome message", e))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("community server {id}")));
        }
        Ok(())
    }

    async fn count_notes(&self, community_server_id: Uuid) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM notes WHERE community_server_id = $1")
                .bind(community_server_id)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| db_err("Failed to count notes", e))?;
        Ok(count.max(0) as u64)
    }
}
