//! Metadata storage using SQLite
//!
//! This module handles all local metadata storage including:
//! - Documents (soft-deleted only, never removed while referenced)
//! - Extraction and chunk sessions
//! - Extracted objects, chunks, keywords and embedding records
//! - Image fingerprints and duplicate flags
//! - The per-document search record and full-text tables

mod chunks;
mod schema;
mod search;
mod sessions;

pub use chunks::*;
pub use schema::*;
pub use search::*;
pub use sessions::*;

use crate::config::Config;
use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// Document processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingStatus::Pending => write!(f, "pending"),
            ProcessingStatus::Processing => write!(f, "processing"),
            ProcessingStatus::Completed => write!(f, "completed"),
            ProcessingStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for ProcessingStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ProcessingStatus::Pending),
            "processing" => Ok(ProcessingStatus::Processing),
            "completed" => Ok(ProcessingStatus::Completed),
            "failed" => Ok(ProcessingStatus::Failed),
            _ => Err(Error::Other(format!("Unknown processing status: {}", s))),
        }
    }
}

/// A document
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub container_id: String,
    pub uri: String,
    pub title: Option<String>,
    pub document_type: String,
    pub content_hash: String,
    pub processing_status: String,
    pub last_error: Option<String>,
    pub active_chunk_session_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub deleted_at: Option<String>,
}

impl Document {
    pub fn new(
        container_id: String,
        uri: String,
        document_type: String,
        content_hash: String,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            container_id,
            uri,
            title: None,
            document_type,
            content_hash,
            processing_status: ProcessingStatus::Pending.to_string(),
            last_error: None,
            active_chunk_session_id: None,
            created_at: now.clone(),
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn status(&self) -> Result<ProcessingStatus> {
        self.processing_status.parse()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Metadata database handle
#[derive(Clone)]
pub struct MetaDb {
    pool: SqlitePool,
}

impl MetaDb {
    /// Connect to the metadata database
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::open(&config.paths.db_file).await
    }

    /// Create database with path directly (without full config), initializing
    /// the schema when missing
    pub async fn new(db_path: &Path) -> Result<Self> {
        let db = Self::open(db_path).await?;
        if !db.is_initialized().await? {
            db.init_schema().await?;
        }
        Ok(db)
    }

    async fn open(db_path: &Path) -> Result<Self> {
        // Create parent directory if needed
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        info!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Check if database is initialized
    pub async fn is_initialized(&self) -> Result<bool> {
        let result: Option<(i32,)> =
            sqlx::query_as("SELECT 1 FROM sqlite_master WHERE type='table' AND name='documents'")
                .fetch_optional(&self.pool)
                .await?;
        Ok(result.is_some())
    }

    /// Drop every table and recreate the schema
    pub async fn reset(&self) -> Result<()> {
        info!("Resetting database schema");
        sqlx::query(RESET_SQL).execute(&self.pool).await?;
        self.init_schema().await
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ===== Document Operations =====

    /// Insert a document or refresh its descriptive fields.
    ///
    /// Status, errors and the active chunk session are owned by the session
    /// transitions and are left untouched on conflict.
    pub async fn upsert_document(&self, doc: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, container_id, uri, title, document_type, content_hash,
                processing_status, last_error, active_chunk_session_id, created_at, updated_at, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                container_id = excluded.container_id,
                uri = excluded.uri,
                title = excluded.title,
                document_type = excluded.document_type,
                content_hash = excluded.content_hash,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.container_id)
        .bind(&doc.uri)
        .bind(&doc.title)
        .bind(&doc.document_type)
        .bind(&doc.content_hash)
        .bind(&doc.processing_status)
        .bind(&doc.last_error)
        .bind(&doc.active_chunk_session_id)
        .bind(&doc.created_at)
        .bind(&doc.updated_at)
        .bind(&doc.deleted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get document by ID (soft-deleted documents included)
    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let doc = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(doc)
    }

    /// List live documents, optionally restricted to one container
    pub async fn list_documents(&self, container_id: Option<&str>) -> Result<Vec<Document>> {
        let docs = match container_id {
            Some(container) => {
                sqlx::query_as::<_, Document>(
                    "SELECT * FROM documents WHERE deleted_at IS NULL AND container_id = ? ORDER BY created_at",
                )
                .bind(container)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, Document>(
                    "SELECT * FROM documents WHERE deleted_at IS NULL ORDER BY created_at",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(docs)
    }

    /// Mark a document deleted; it disappears from retrieval but keeps its rows
    pub async fn soft_delete_document(&self, id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE documents SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 && self.get_document(id).await?.is_none() {
            return Err(Error::NotFound(format!("document {}", id)));
        }
        Ok(())
    }

    /// Move a document from `processing` to `completed` and publish the chunk
    /// session whose chunks become visible to retrieval
    pub async fn complete_document(&self, document_id: &str, chunk_session_id: &str) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE documents SET
                processing_status = 'completed',
                active_chunk_session_id = ?,
                last_error = NULL,
                updated_at = ?
            WHERE id = ? AND processing_status = 'processing'
            "#,
        )
        .bind(chunk_session_id)
        .bind(&now)
        .bind(document_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::State(format!(
                "document {} is not processing",
                document_id
            )));
        }

        refresh_search_index(&mut tx, document_id, chunk_session_id).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Move a document to `failed` outside of a session transition
    pub async fn fail_document(&self, document_id: &str, message: &str) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        mark_document_failed(&mut conn, document_id, message).await
    }

    // ===== Statistics =====

    /// Get global statistics
    pub async fn get_global_stats(&self) -> Result<GlobalStats> {
        let document_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE deleted_at IS NULL")
                .fetch_one(&self.pool)
                .await?;

        let failed_documents: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM documents WHERE deleted_at IS NULL AND processing_status = 'failed'",
        )
        .fetch_one(&self.pool)
        .await?;

        let running_sessions: i64 = sqlx::query_scalar(
            r#"
            SELECT (SELECT COUNT(*) FROM extraction_sessions WHERE status = 'running')
                 + (SELECT COUNT(*) FROM chunk_sessions WHERE status = 'running')
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let visible_chunks: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM chunks c
            JOIN documents d ON c.document_id = d.id
            WHERE d.deleted_at IS NULL AND c.chunk_session_id = d.active_chunk_session_id
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let text_embeddings: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM embeddings WHERE vector_kind = 'text'")
                .fetch_one(&self.pool)
                .await?;

        let visual_embeddings: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM embeddings WHERE vector_kind = 'visual'")
                .fetch_one(&self.pool)
                .await?;

        let duplicate_images: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM duplicate_images")
            .fetch_one(&self.pool)
            .await?;

        Ok(GlobalStats {
            document_count: document_count as usize,
            failed_documents: failed_documents as usize,
            running_sessions: running_sessions as usize,
            visible_chunks: visible_chunks as usize,
            text_embeddings: text_embeddings as usize,
            visual_embeddings: visual_embeddings as usize,
            duplicate_images: duplicate_images as usize,
        })
    }
}

pub(crate) async fn mark_document_failed(
    conn: &mut SqliteConnection,
    document_id: &str,
    message: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE documents SET processing_status = 'failed', last_error = ?, updated_at = ? WHERE id = ?",
    )
    .bind(message)
    .bind(Utc::now().to_rfc3339())
    .bind(document_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Recompute the materialized search record of a document from one chunk
/// session. Runs on the caller's transaction.
pub(crate) async fn refresh_search_index(
    conn: &mut SqliteConnection,
    document_id: &str,
    chunk_session_id: &str,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO search_index (document_id, container_id, title, keywords_text, chunk_count,
            text_embeddings, visual_embeddings, updated_at)
        SELECT
            d.id,
            d.container_id,
            d.title,
            COALESCE((
                SELECT group_concat(keyword, ' ') FROM (
                    SELECT DISTINCT k.keyword FROM chunk_keywords k
                    JOIN chunks c ON c.id = k.chunk_id
                    WHERE c.chunk_session_id = ?1
                    ORDER BY k.keyword
                )
            ), ''),
            (SELECT COUNT(*) FROM chunks WHERE chunk_session_id = ?1),
            (SELECT COUNT(*) FROM embeddings e JOIN chunks c ON c.id = e.chunk_id
                WHERE c.chunk_session_id = ?1 AND e.vector_kind = 'text'),
            (SELECT COUNT(*) FROM embeddings e JOIN chunks c ON c.id = e.chunk_id
                WHERE c.chunk_session_id = ?1 AND e.vector_kind = 'visual'),
            ?2
        FROM documents d WHERE d.id = ?3
        ON CONFLICT(document_id) DO UPDATE SET
            container_id = excluded.container_id,
            title = excluded.title,
            keywords_text = excluded.keywords_text,
            chunk_count = excluded.chunk_count,
            text_embeddings = excluded.text_embeddings,
            visual_embeddings = excluded.visual_embeddings,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(chunk_session_id)
    .bind(Utc::now().to_rfc3339())
    .bind(document_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Global statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    pub document_count: usize,
    pub failed_documents: usize,
    pub running_sessions: usize,
    pub visible_chunks: usize,
    pub text_embeddings: usize,
    pub visual_embeddings: usize,
    pub duplicate_images: usize,
}

/// Per-document search record
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SearchIndexRow {
    pub document_id: String,
    pub container_id: String,
    pub title: Option<String>,
    pub keywords_text: String,
    pub chunk_count: i64,
    pub text_embeddings: i64,
    pub visual_embeddings: i64,
    pub updated_at: String,
}

impl MetaDb {
    pub async fn get_search_record(&self, document_id: &str) -> Result<Option<SearchIndexRow>> {
        let row = sqlx::query_as::<_, SearchIndexRow>(
            "SELECT * FROM search_index WHERE document_id = ?",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}
