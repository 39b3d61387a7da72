//! Chunk repository: dedup storage, links, and the two search legs.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::Row;
use sqlx::postgres::PgPool;
use uuid::Uuid;

use opennotes_domain::entities::{Chunk, ChunkLink, ChunkSourceKind};
use opennotes_domain::error::Result;
use opennotes_domain::ports::ChunkRepository;
use opennotes_infrastructure::retry::DeadlockRetry;

use super::db_err;

/// sqlx + pgvector chunk storage.
///
/// `search_vector` is a tsvector column kept in sync with `chunk_text` by a
/// database trigger; it never crosses the wire.
pub struct PgChunkRepository {
    pool: PgPool,
    retry: DeadlockRetry,
}

impl PgChunkRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            retry: DeadlockRetry::default(),
        }
    }

    fn link_table(kind: ChunkSourceKind) -> &'static str {
        match kind {
            ChunkSourceKind::FactCheck => "fact_check_chunks",
            ChunkSourceKind::PreviouslySeen => "previously_seen_chunks",
        }
    }

    fn row_to_chunk(row: &sqlx::postgres::PgRow) -> Result<Chunk> {
        let embedding: Option<Vector> = row
            .try_get("embedding")
            .map_err(|e| db_err("read embedding", e))?;
        Ok(Chunk {
            id: row.try_get("id").map_err(|e| db_err("read id", e))?,
            chunk_text: row
                .try_get("chunk_text")
                .map_err(|e| db_err("read chunk_text", e))?,
            chunk_text_hash: row
                .try_get("chunk_text_hash")
                .map_err(|e| db_err("read chunk_text_hash", e))?,
            embedding: embedding.map(|v| v.to_vec()),
            embedding_provider: row
                .try_get("embedding_provider")
                .map_err(|e| db_err("read embedding_provider", e))?,
            embedding_model: row
                .try_get("embedding_model")
                .map_err(|e| db_err("read embedding_model", e))?,
            is_common: row.try_get("is_common").map_err(|e| db_err("read is_common", e))?,
            created_at: row.try_get("created_at").map_err(|e| db_err("read created_at", e))?,
        })
    }
}

const CHUNK_COLUMNS: &str = "id, chunk_text, chunk_text_hash, embedding, embedding_provider, \
                             embedding_model, is_common, created_at";

#[async_trait]
impl ChunkRepository for PgChunkRepository {
    async fn upsert_chunk(&self, chunk: &Chunk) -> Result<Chunk> {
        // Hash conflict returns the existing row untouched; chunks are
        // immutable once created except for embedding backfill. Concurrent
        // ON CONFLICT inserts can deadlock under load, hence the retry.
        let row = self
            .retry
            .run(|| async {
                sqlx::query(&format!(
                    "INSERT INTO chunk_embeddings \
                     (id, chunk_text, chunk_text_hash, embedding, embedding_provider, \
                      embedding_model, is_common, created_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                     ON CONFLICT (chunk_text_hash) \
                     DO UPDATE SET chunk_text_hash = EXCLUDED.chunk_text_hash \
                     RETURNING {CHUNK_COLUMNS}"
                ))
                .bind(chunk.id)
                .bind(&chunk.chunk_text)
                .bind(&chunk.chunk_text_hash)
                .bind(chunk.embedding.clone().map(Vector::from))
                .bind(&chunk.embedding_provider)
                .bind(&chunk.embedding_model)
                .bind(chunk.is_common)
                .bind(chunk.created_at)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| db_err("Failed to upsert chunk", e))
            })
            .await?;
        Self::row_to_chunk(&row)
    }

    async fn upsert_link(&self, kind: ChunkSourceKind, link: &ChunkLink) -> Result<()> {
        self.retry
            .run(|| async {
                sqlx::query(&format!(
                    "INSERT INTO {} (chunk_id, source_id, chunk_index) VALUES ($1, $2, $3) \
                     ON CONFLICT (chunk_id, source_id) \
                     DO UPDATE SET chunk_index = EXCLUDED.chunk_index",
                    Self::link_table(kind)
                ))
                .bind(link.chunk_id)
                .bind(link.source_id)
                .bind(link.chunk_index)
                .execute(&self.pool)
                .await
                .map_err(|e| db_err("Failed to upsert chunk link", e))
            })
            .await?;
        Ok(())
    }

    async fn set_embedding(
        &self,
        chunk_id: Uuid,
        embedding: &[f32],
        provider: &str,
        model: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE chunk_embeddings \
             SET embedding = $2, embedding_provider = $3, embedding_model = $4 \
             WHERE id = $1",
        )
        .bind(chunk_id)
        .bind(Vector::from(embedding.to_vec()))
        .bind(provider)
        .bind(model)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to backfill embedding", e))?;
        Ok(())
    }

    async fn find_missing_embeddings(&self, limit: i64) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {CHUNK_COLUMNS} FROM chunk_embeddings \
             WHERE embedding IS NULL ORDER BY created_at ASC LIMIT $1"
        ))
        .bind(limit.clamp(1, 1000))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to find chunks missing embeddings", e))?;
        rows.iter().map(Self::row_to_chunk).collect()
    }

    async fn vector_search(
        &self,
        embedding: &[f32],
        dataset_tags: &[String],
        limit: i64,
    ) -> Result<Vec<(Chunk, f64, Vec<Uuid>)>> {
        // HNSW index on chunk_embeddings.embedding serves the <=> scan.
        let rows = sqlx::query(&format!(
            "SELECT {CHUNK_COLUMNS}, \
                    (embedding <=> $1) AS distance, \
                    ARRAY( \
                        SELECT fcc.source_id FROM fact_check_chunks fcc \
                        WHERE fcc.chunk_id = chunk_embeddings.id \
                    ) AS source_ids \
             FROM chunk_embeddings \
             WHERE embedding IS NOT NULL \
               AND ($2::text[] = '{{}}' OR EXISTS ( \
                     SELECT 1 FROM fact_check_chunks fcc \
                     JOIN fact_check_items fci ON fci.id = fcc.source_id \
                     WHERE fcc.chunk_id = chunk_embeddings.id \
                       AND fci.dataset_tags && $2 \
                   )) \
             ORDER BY embedding <=> $1 \
             LIMIT $3"
        ))
        .bind(Vector::from(embedding.to_vec()))
        .bind(dataset_tags)
        .bind(limit.clamp(1, 200))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Vector search failed", e))?;

        rows.iter()
            .map(|row| {
                let chunk = Self::row_to_chunk(row)?;
                let distance: f64 = row.try_get("distance").map_err(|e| db_err("read distance", e))?;
                let source_ids: Vec<Uuid> = row
                    .try_get("source_ids")
                    .map_err(|e| db_err("read source_ids", e))?;
                Ok((chunk, distance, source_ids))
            })
            .collect()
    }

    async fn keyword_search(
        &self,
        query: &str,
        dataset_tags: &[String],
        limit: i64,
    ) -> Result<Vec<(Chunk, f64, Vec<Uuid>)>> {
        let rows = sqlx::query(&format!(
            "SELECT {CHUNK_COLUMNS}, \
                    ts_rank(search_vector, plainto_tsquery('english', $1))::float8 AS rank, \
                    ARRAY( \
                        SELECT fcc.source_id FROM fact_check_chunks fcc \
                        WHERE fcc.chunk_id = chunk_embeddings.id \
                    ) AS source_ids \
             FROM chunk_embeddings \
             WHERE search_vector @@ plainto_tsquery('english', $1) \
               AND ($2::text[] = '{{}}' OR EXISTS ( \
                     SELECT 1 FROM fact_check_chunks fcc \
                     JOIN fact_check_items fci ON fci.id = fcc.source_id \
                     WHERE fcc.chunk_id = chunk_embeddings.id \
                       AND fci.dataset_tags && $2 \
                   )) \
             ORDER BY rank DESC \
             LIMIT $3"
        ))
        .bind(query)
        .bind(dataset_tags)
        .bind(limit.clamp(1, 200))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Keyword search failed", e))?;

        rows.iter()
            .map(|row| {
                let chunk = Self::row_to_chunk(row)?;
                let rank: f64 = row.try_get("rank").map_err(|e| db_err("read rank", e))?;
                let source_ids: Vec<Uuid> = row
                    .try_get("source_ids")
                    .map_err(|e| db_err("read source_ids", e))?;
                Ok((chunk, rank, source_ids))
            })
            .collect()
    }

    async fn nearest_previously_seen(
        &self,
        embedding: &[f32],
        community_server_id: Uuid,
        limit: i64,
    ) -> Result<Vec<(Uuid, f64)>> {
        let rows = sqlx::query(
            "SELECT psc.source_id, (ce.embedding <=> $1) AS distance \
             FROM chunk_embeddings ce \
             JOIN previously_seen_chunks psc ON psc.chunk_id = ce.id \
             JOIN previously_seen_messages psm ON psm.id = psc.source_id \
             WHERE ce.embedding IS NOT NULL AND psm.community_server_id = $2 \
             ORDER BY ce.embedding <=> $1 \
             LIMIT $3",
        )
        .bind(Vector::from(embedding.to_vec()))
        .bind(community_server_id)
        .bind(limit.clamp(1, 200))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Previously-seen search failed", e))?;

        rows.iter()
            .map(|row| {
                let source_id: Uuid = row
                    .try_get("source_id")
                    .map_err(|e| db_err("read source_id", e))?;
                let distance: f64 = row.try_get("distance").map_err(|e| db_err("read distance", e))?;
                Ok((source_id, distance))
            })
            .collect()
    }
}
