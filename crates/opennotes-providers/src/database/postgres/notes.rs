//! Note and rating repository, plus the production scoring data provider.

use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::PgPool;
use uuid::Uuid;

use opennotes_domain::entities::{Note, Rating};
use opennotes_domain::error::{Error, Result};
use opennotes_domain::ports::repositories::NoteRepository;
use opennotes_domain::ports::ScoringDataProvider;

use super::db_err;

/// sqlx-backed note storage as the scoring subsystem sees it.
pub struct PgNoteRepository {
    pool: PgPool,
}

impl PgNoteRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_note(row: &sqlx::postgres::PgRow) -> Result<Note> {
        Ok(Note {
            id: row.try_get("id").map_err(|e| db_err("read id", e))?,
            author_participant_id: row
                .try_get("author_participant_id")
                .map_err(|e| db_err("read author_participant_id", e))?,
            community_server_id: row
                .try_get("community_server_id")
                .map_err(|e| db_err("read community_server_id", e))?,
            classification: row
                .try_get("classification")
                .map_err(|e| db_err("read classification", e))?,
            status: row.try_get("status").map_err(|e| db_err("read status", e))?,
            helpfulness_score: row
                .try_get("helpfulness_score")
                .map_err(|e| db_err("read helpfulness_score", e))?,
            created_at: row.try_get("created_at").map_err(|e| db_err("read created_at", e))?,
        })
    }

    fn row_to_rating(row: &sqlx::postgres::PgRow) -> Result<Rating> {
        Ok(Rating {
            id: row.try_get("id").map_err(|e| db_err("read id", e))?,
            note_id: row.try_get("note_id").map_err(|e| db_err("read note_id", e))?,
            rater_participant_id: row
                .try_get("rater_participant_id")
                .map_err(|e| db_err("read rater_participant_id", e))?,
            helpfulness_level: row
                .try_get("helpfulness_level")
                .map_err(|e| db_err("read helpfulness_level", e))?,
            created_at: row.try_get("created_at").map_err(|e| db_err("read created_at", e))?,
        })
    }
}

#[async_trait]
impl NoteRepository for PgNoteRepository {
    async fn notes_for_community(&self, community_server_id: Uuid) -> Result<Vec<Note>> {
        let rows = sqlx::query(
            "SELECT id, author_participant_id, community_server_id, classification, status, \
                    helpfulness_score, created_at \
             FROM notes WHERE community_server_id = $1 ORDER BY created_at ASC",
        )
        .bind(community_server_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to load notes", e))?;
        rows.iter().map(Self::row_to_note).collect()
    }

    async fn ratings_for_community(&self, community_server_id: Uuid) -> Result<Vec<Rating>> {
        let rows = sqlx::query(
            "SELECT r.id, r.note_id, r.rater_participant_id, r.helpfulness_level, r.created_at \
             FROM ratings r JOIN notes n ON n.id = r.note_id \
             WHERE n.community_server_id = $1 ORDER BY r.created_at ASC",
        )
        .bind(community_server_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_err("Failed to load ratings", e))?;
        rows.iter().map(Self::row_to_rating).collect()
    }

    async fn set_helpfulness_score(&self, note_id: Uuid, score: f64) -> Result<()> {
        let result =
            sqlx::query("UPDATE notes SET helpfulness_score = $2, updated_at = NOW() WHERE id = $1")
                .bind(note_id)
                .bind(score)
                .execute(&self.pool)
                .await
                .map_err(|e| db_err("Failed to set helpfulness score", e))?;
        if result.rows_affected() == 0 {
            return Err(Error::not_found(format!("note {note_id}")));
        }
        Ok(())
    }
}

/// Production data provider for the scoring adapter.
///
/// Thin facade over [`PgNoteRepository`]; test doubles implementing
/// [`ScoringDataProvider`] swap in without touching the adapter.
pub struct PgScoringDataProvider {
    notes: PgNoteRepository,
}

impl PgScoringDataProvider {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            notes: PgNoteRepository::new(pool),
        }
    }
}

#[async_trait]
impl ScoringDataProvider for PgScoringDataProvider {
    async fn ratings_for_community(&self, community_server_id: Uuid) -> Result<Vec<Rating>> {
        NoteRepository::ratings_for_community(&self.notes, community_server_id).await
    }

    async fn notes_for_community(&self, community_server_id: Uuid) -> Result<Vec<Note>> {
        NoteRepository::notes_for_community(&self.notes, community_server_id).await
    }

    async fn participant_ids_for_community(&self, community_server_id: Uuid) -> Result<Vec<String>> {
        sqlx::query_scalar(
            "SELECT DISTINCT participant_id FROM ( \
                 SELECT author_participant_id AS participant_id FROM notes \
                 WHERE community_server_id = $1 \
                 UNION \
                 SELECT r.rater_participant_id FROM ratings r \
                 JOIN notes n ON n.id = r.note_id WHERE n.community_server_id = $1 \
             ) participants ORDER BY participant_id",
        )
        .bind(community_server_id)
        .fetch_all(&self.notes.pool)
        .await
        .map_err(|e| db_err("Failed to load participant ids", e))
    }
}
