//! Previously-seen message repository.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::Row;
use sqlx::postgres::PgPool;
use uuid::Uuid;

use opennotes_domain::entities::PreviouslySeenMessage;
use opennotes_domain::error::Result;
use opennotes_domain::ports::PreviouslySeenRepository;

use super::db_err;

/// sqlx-backed previously-seen message storage.
pub struct PgPreviouslySeenRepository {
    pool: PgPool,
}

impl PgPreviouslySeenRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_message(row: &sqlx::postgres::PgRow) -> Result<PreviouslySeenMessage> {
        let embedding: Option<Vector> = row
            .try_get("embedding")
            .map_err(|e| db_err("read embedding", e))?;
        Ok(PreviouslySeenMessage {
            id: row.try_get("id").map_err(|e| db_err("read id", e))?,
            community_server_id: row
                .try_get("community_server_id")
                .map_err(|e| db_err("read community_server_id", e))?,
            original_message_id: row
                .try_get("original_message_id")
                .map_err(|e| db_err("read original_message_id", e))?,
            published_note_id: row
                .try_get("published_note_id")
                .map_err(|e| db_err("read published_note_id", e))?,
            embedding: embedding.map(|v| v.to_vec()),
            embedding_provider: row
                .try_get("embedding_provider")
                .map_err(|e| db_err("read embedding_provider", e))?,
            embedding_model: row
                .try_get("embedding_model")
                .map_err(|e| db_err("read embedding_model", e))?,
            extra_metadata: row
                .try_get("extra_metadata")
                .map_err(|e| db_err("read extra_metadata", e))?,
            created_at: row.try_get("created_at").map_err(|e| db_err("read created_at", e))?,
        })
    }
}

const COLUMNS: &str = "id, community_server_id, original_message_id, published_note_id, \
                       embedding, embedding_provider, embedding_model, extra_metadata, created_at";

#[async_trait]
impl PreviouslySeenRepository for PgPreviouslySeenRepository {
    async fn insert(&self, message: &PreviouslySeenMessage) -> Result<()> {
        sqlx::query(
            "INSERT INTO previously_seen_messages \
             (id, community_server_id, original_message_id, published_note_id, embedding, \
              embedding_provider, embedding_model, extra_metadata, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(message.id)
        .bind(message.community_server_id)
        .bind(&message.original_message_id)
        .bind(message.published_note_id)
        .bind(message.embedding.clone().map(Vector::from))
        .bind(&message.embedding_provider)
        .bind(&message.embedding_model)
        .bind(&message.extra_metadata)
        .bind(message.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to insert previously-seen message", e))?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<PreviouslySeenMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM previously_seen_messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to load previously-seen message", e))?;
        row.as_ref().map(Self::row_to_message).transpose()
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<PreviouslySeenMessage>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM previously_seen_messages WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to load previously-seen messages", e))?;
        rows.iter().map(Self::row_to_message).collect()
    }

    async fn list_for_community_after(
        &self,
        community_server_id: Uuid,
        after: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<PreviouslySeenMessage>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM previously_seen_messages \
             WHERE community_server_id = $1 AND ($2::uuid IS NULL OR id > $2) \
             ORDER BY id ASC LIMIT $3"
        ))
        .bind(community_server_id)
        .bind(after)
        .bind(limit.clamp(1, 500))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to page previously-seen messages", e))?;
        rows.iter().map(Self::row_to_message).collect()
    }
}
