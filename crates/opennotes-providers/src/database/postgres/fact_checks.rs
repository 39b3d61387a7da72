//! Fact-check candidate and item repository.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::Row;
use sqlx::postgres::PgPool;
use std::collections::BTreeMap;
use uuid::Uuid;

use opennotes_domain::entities::{CandidateStatus, FactCheckCandidate, FactCheckItem};
use opennotes_domain::error::{Error, Result};
use opennotes_domain::ports::FactCheckRepository;

use super::db_err;

/// sqlx-backed fact-check storage.
pub struct PgFactCheckRepository {
    pool: PgPool,
}

impl PgFactCheckRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_candidate(row: &sqlx::postgres::PgRow) -> Result<FactCheckCandidate> {
        let status: String = row.try_get("status").map_err(|e| db_err("read status", e))?;
        let predicted: Value = row
            .try_get("predicted_ratings")
            .map_err(|e| db_err("read predicted_ratings", e))?;
        let predicted_ratings: BTreeMap<String, f64> = match predicted {
            Value::Object(map) => map
                .into_iter()
                .filter_map(|(k, v)| v.as_f64().map(|p| (k, p)))
                .collect(),
            _ => BTreeMap::new(),
        };
        Ok(FactCheckCandidate {
            id: row.try_get("id").map_err(|e| db_err("read id", e))?,
            source_url: row.try_get("source_url").map_err(|e| db_err("read source_url", e))?,
            claim_hash: row.try_get("claim_hash").map_err(|e| db_err("read claim_hash", e))?,
            title: row.try_get("title").map_err(|e| db_err("read title", e))?,
            content: row.try_get("content").map_err(|e| db_err("read content", e))?,
            summary: row.try_get("summary").map_err(|e| db_err("read summary", e))?,
            rating: row.try_get("rating").map_err(|e| db_err("read rating", e))?,
            rating_details: row
                .try_get("rating_details")
                .map_err(|e| db_err("read rating_details", e))?,
            predicted_ratings,
            published_date: row
                .try_get("published_date")
                .map_err(|e| db_err("read published_date", e))?,
            dataset_name: row
                .try_get("dataset_name")
                .map_err(|e| db_err("read dataset_name", e))?,
            dataset_tags: row
                .try_get("dataset_tags")
                .map_err(|e| db_err("read dataset_tags", e))?,
            original_id: row.try_get("original_id").map_err(|e| db_err("read original_id", e))?,
            extracted_data: row
                .try_get("extracted_data")
                .map_err(|e| db_err("read extracted_data", e))?,
            status: status
                .parse()
                .map_err(|e: String| Error::internal(format!("Corrupt candidate status: {e}")))?,
            error_message: row
                .try_get("error_message")
                .map_err(|e| db_err("read error_message", e))?,
            created_at: row.try_get("created_at").map_err(|e| db_err("read created_at", e))?,
            updated_at: row.try_get("updated_at").map_err(|e| db_err("read updated_at", e))?,
        })
    }

    fn row_to_item(row: &sqlx::postgres::PgRow) -> Result<FactCheckItem> {
        Ok(FactCheckItem {
            id: row.try_get("id").map_err(|e| db_err("read id", e))?,
            source_url: row.try_get("source_url").map_err(|e| db_err("read source_url", e))?,
            claim_hash: row.try_get("claim_hash").map_err(|e| db_err("read claim_hash", e))?,
            title: row.try_get("title").map_err(|e| db_err("read title", e))?,
            content: row.try_get("content").map_err(|e| db_err("read content", e))?,
            summary: row.try_get("summary").map_err(|e| db_err("read summary", e))?,
            rating: row.try_get("rating").map_err(|e| db_err("read rating", e))?,
            dataset_name: row
                .try_get("dataset_name")
                .map_err(|e| db_err("read dataset_name", e))?,
            dataset_tags: row
                .try_get("dataset_tags")
                .map_err(|e| db_err("read dataset_tags", e))?,
            published_date: row
                .try_get("published_date")
                .map_err(|e| db_err("read published_date", e))?,
            created_at: row.try_get("created_at").map_err(|e| db_err("read created_at", e))?,
        })
    }
}

const CANDIDATE_COLUMNS: &str = "id, source_url, claim_hash, title, content, summary, rating, \
                                 rating_details, predicted_ratings, published_date, dataset_name, \
                                 dataset_tags, original_id, extracted_data, status, error_message, \
                                 created_at, updated_at";

const ITEM_COLUMNS: &str = "id, source_url, claim_hash, title, content, summary, rating, \
                            dataset_name, dataset_tags, published_date, created_at";

#[async_trait]
impl FactCheckRepository for PgFactCheckRepository {
    async fn get_candidate(&self, id: Uuid) -> Result<Option<FactCheckCandidate>> {
        let row = sqlx::query(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM fact_checked_item_candidates WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to load candidate", e))?;
        row.as_ref().map(Self::row_to_candidate).transpose()
    }

    async fn insert_candidate(&self, candidate: &FactCheckCandidate) -> Result<bool> {
        let predicted = Value::Object(
            candidate
                .predicted_ratings
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::json!(v)))
                .collect(),
        );
        let result = sqlx::query(
            "INSERT INTO fact_checked_item_candidates \
             (id, source_url, claim_hash, title, content, summary, rating, rating_details, \
              predicted_ratings, published_date, dataset_name, dataset_tags, original_id, \
              extracted_data, status, error_message, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18) \
             ON CONFLICT (source_url, claim_hash, dataset_name) DO NOTHING",
        )
        .bind(candidate.id)
        .bind(&candidate.source_url)
        .bind(&candidate.claim_hash)
        .bind(&candidate.title)
        .bind(&candidate.content)
        .bind(&candidate.summary)
        .bind(&candidate.rating)
        .bind(&candidate.rating_details)
        .bind(predicted)
        .bind(candidate.published_date)
        .bind(&candidate.dataset_name)
        .bind(&candidate.dataset_tags)
        .bind(&candidate.original_id)
        .bind(&candidate.extracted_data)
        .bind(candidate.status.as_str())
        .bind(&candidate.error_message)
        .bind(candidate.created_at)
        .bind(candidate.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to insert candidate", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_candidate_status(
        &self,
        id: Uuid,
        status: CandidateStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE fact_checked_item_candidates \
             SET status = $2, error_message = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to update candidate status", e))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("candidate {id}")));
        }
        Ok(())
    }

    async fn insert_item(&self, item: &FactCheckItem) -> Result<()> {
        // Promotion retries land here; the conflict target keeps the item
        // rowed in exactly once.
        sqlx::query(
            "INSERT INTO fact_check_items \
             (id, source_url, claim_hash, title, content, summary, rating, dataset_name, \
              dataset_tags, published_date, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (source_url, claim_hash, dataset_name) DO NOTHING",
        )
        .bind(item.id)
        .bind(&item.source_url)
        .bind(&item.claim_hash)
        .bind(&item.title)
        .bind(&item.content)
        .bind(&item.summary)
        .bind(&item.rating)
        .bind(&item.dataset_name)
        .bind(&item.dataset_tags)
        .bind(item.published_date)
        .bind(item.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_err("Failed to insert fact-check item", e))?;
        Ok(())
    }

    async fn get_item(&self, id: Uuid) -> Result<Option<FactCheckItem>> {
        let row = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM fact_check_items WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_err("Failed to load fact-check item", e))?;
        row.as_ref().map(Self::row_to_item).transpose()
    }

    async fn list_items_after(&self, after: Option<Uuid>, limit: i64) -> Result<Vec<FactCheckItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM fact_check_items \
             WHERE ($1::uuid IS NULL OR id > $1) \
             ORDER BY id ASC LIMIT $2"
        ))
        .bind(after)
        .bind(limit.clamp(1, 500))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to page fact-check items", e))?;
        rows.iter().map(Self::row_to_item).collect()
    }

    async fn count_items(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM fact_check_items")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| db_err("Failed to count fact-check items", e))
    }
}

