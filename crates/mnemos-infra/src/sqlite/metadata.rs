//! SQLite metadata store implementation.
//!
//! Implements `MetadataStore` from `mnemos-core` using sqlx with split read/write pools.
//! Embeddings and metadata are stored as JSON text, timestamps as fixed-width
//! RFC 3339 so that `ORDER BY created_at` is chronological.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;
use uuid::Uuid;

use mnemos_core::memory::metadata::{MetadataStore, require_user_scope};
use mnemos_types::error::RepositoryError;
use mnemos_types::memory::{Memory, MemoryFilter, MemoryMetadata};

use super::pool::DatabasePool;

/// SQLite-backed implementation of `MetadataStore`.
pub struct SqliteMetadataStore {
    pool: DatabasePool,
}

impl SqliteMetadataStore {
    /// Create a new store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row type for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct MemoryRow {
    id: String,
    user_id: String,
    content: String,
    category: String,
    embedding: String,
    metadata: String,
    created_at: String,
    updated_at: String,
}

impl MemoryRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            content: row.try_get("content")?,
            category: row.try_get("category")?,
            embedding: row.try_get("embedding")?,
            metadata: row.try_get("metadata")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn into_memory(self) -> Result<Memory, RepositoryError> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| RepositoryError::Query(format!("invalid memory id: {e}")))?;
        let embedding: Vec<f32> = serde_json::from_str(&self.embedding)
            .map_err(|e| RepositoryError::Query(format!("invalid embedding for {id}: {e}")))?;
        let metadata: MemoryMetadata = serde_json::from_str(&self.metadata)
            .map_err(|e| RepositoryError::Query(format!("invalid metadata for {id}: {e}")))?;

        Ok(Memory {
            id,
            user_id: self.user_id,
            content: self.content,
            category: self.category,
            embedding,
            metadata,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
        })
    }
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime '{s}': {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

// ---------------------------------------------------------------------------
// MetadataStore implementation
// ---------------------------------------------------------------------------

impl MetadataStore for SqliteMetadataStore {
    async fn get(&self, id: &Uuid) -> Result<Option<Memory>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM memories WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(r) => {
                let memory_row =
                    MemoryRow::from_row(&r).map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(memory_row.into_memory()?))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, memory: &Memory) -> Result<(), RepositoryError> {
        let embedding = serde_json::to_string(&memory.embedding)
            .map_err(|e| RepositoryError::Query(format!("failed to encode embedding: {e}")))?;
        let metadata = serde_json::to_string(&memory.metadata)
            .map_err(|e| RepositoryError::Query(format!("failed to encode metadata: {e}")))?;

        sqlx::query(
            r#"INSERT INTO memories (id, user_id, content, category, embedding, metadata, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                   user_id = excluded.user_id,
                   content = excluded.content,
                   category = excluded.category,
                   embedding = excluded.embedding,
                   metadata = excluded.metadata,
                   created_at = excluded.created_at,
                   updated_at = excluded.updated_at"#,
        )
        .bind(memory.id.to_string())
        .bind(&memory.user_id)
        .bind(&memory.content)
        .bind(&memory.category)
        .bind(embedding)
        .bind(metadata)
        .bind(format_datetime(&memory.created_at))
        .bind(format_datetime(&memory.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM memories WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn find(&self, filter: &MemoryFilter) -> Result<Vec<Memory>, RepositoryError> {
        let user_id = require_user_scope(filter)?;

        let rows = match filter.category.as_deref() {
            Some(category) => {
                sqlx::query(
                    "SELECT * FROM memories WHERE user_id = ? AND category = ? ORDER BY created_at ASC, id ASC",
                )
                .bind(user_id)
                .bind(category)
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM memories WHERE user_id = ? ORDER BY created_at ASC, id ASC",
                )
                .bind(user_id)
                .fetch_all(&self.pool.reader)
                .await
            }
        }
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter()
            .map(|r| {
                MemoryRow::from_row(r)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?
                    .into_memory()
            })
            .collect()
    }

    async fn delete_all_for_user(&self, user_id: &str) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM memories WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }
}
