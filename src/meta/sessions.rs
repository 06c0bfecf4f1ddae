//! Session rows and their single-statement transitions

use super::{mark_document_failed, MetaDb};
use crate::error::{Error, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Success,
    Failed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Success => write!(f, "success"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "running" => Ok(SessionStatus::Running),
            "success" => Ok(SessionStatus::Success),
            "failed" => Ok(SessionStatus::Failed),
            _ => Err(Error::Other(format!("Unknown session status: {}", s))),
        }
    }
}

/// Which session table a transition applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Extraction,
    Chunk,
}

impl SessionKind {
    fn table(&self) -> &'static str {
        match self {
            SessionKind::Extraction => "extraction_sessions",
            SessionKind::Chunk => "chunk_sessions",
        }
    }

    fn count_column(&self) -> &'static str {
        match self {
            SessionKind::Extraction => "page_count",
            SessionKind::Chunk => "chunk_count",
        }
    }
}

impl std::fmt::Display for SessionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionKind::Extraction => write!(f, "extraction session"),
            SessionKind::Chunk => write!(f, "chunk session"),
        }
    }
}

/// One extraction run over a document
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExtractionSession {
    pub id: String,
    pub document_id: String,
    pub provider: String,
    pub model_profile: String,
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub page_count: Option<i64>,
    pub error_message: Option<String>,
}

impl ExtractionSession {
    pub fn new(document_id: String, provider: String, model_profile: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document_id,
            provider,
            model_profile,
            status: SessionStatus::Running.to_string(),
            started_at: Utc::now().to_rfc3339(),
            completed_at: None,
            page_count: None,
            error_message: None,
        }
    }

    pub fn status(&self) -> Result<SessionStatus> {
        self.status.parse()
    }
}

/// One chunking run over a successful extraction
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChunkSession {
    pub id: String,
    pub document_id: String,
    pub extraction_session_id: String,
    pub strategy_name: String,
    pub params_json: String,
    pub status: String,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub chunk_count: Option<i64>,
    pub error_message: Option<String>,
}

impl ChunkSession {
    pub fn new(
        document_id: String,
        extraction_session_id: String,
        strategy_name: String,
        params_json: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            document_id,
            extraction_session_id,
            strategy_name,
            params_json,
            status: SessionStatus::Running.to_string(),
            started_at: Utc::now().to_rfc3339(),
            completed_at: None,
            chunk_count: None,
            error_message: None,
        }
    }

    pub fn status(&self) -> Result<SessionStatus> {
        self.status.parse()
    }
}

fn map_start_conflict(err: sqlx::Error, kind: SessionKind, document_id: &str) -> Error {
    match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => Error::Conflict(format!(
            "a running {} already exists for document {}",
            kind, document_id
        )),
        _ => Error::Database(err),
    }
}

impl MetaDb {
    /// Insert a running extraction session and move the document to processing.
    ///
    /// The insert is the first statement of the transaction and only matches
    /// a live document. The partial unique index on running sessions turns a
    /// concurrent second start into a Conflict.
    pub async fn insert_extraction_session(&self, session: &ExtractionSession) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO extraction_sessions (id, document_id, provider, model_profile, status, started_at)
            SELECT ?, id, ?, ?, ?, ? FROM documents WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(&session.id)
        .bind(&session.provider)
        .bind(&session.model_profile)
        .bind(&session.status)
        .bind(&session.started_at)
        .bind(&session.document_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_start_conflict(e, SessionKind::Extraction, &session.document_id))?;

        if inserted.rows_affected() == 0 {
            return Err(Error::NotFound(format!("document {}", session.document_id)));
        }

        sqlx::query(
            "UPDATE documents SET processing_status = 'processing', last_error = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(&session.started_at)
        .bind(&session.document_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Insert a running chunk session
    pub async fn insert_chunk_session(&self, session: &ChunkSession) -> Result<()> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO chunk_sessions (id, document_id, extraction_session_id, strategy_name,
                params_json, status, started_at)
            SELECT ?, id, ?, ?, ?, ?, ? FROM documents WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(&session.id)
        .bind(&session.extraction_session_id)
        .bind(&session.strategy_name)
        .bind(&session.params_json)
        .bind(&session.status)
        .bind(&session.started_at)
        .bind(&session.document_id)
        .execute(self.pool())
        .await
        .map_err(|e| map_start_conflict(e, SessionKind::Chunk, &session.document_id))?;

        if inserted.rows_affected() == 0 {
            return Err(Error::NotFound(format!("document {}", session.document_id)));
        }
        Ok(())
    }

    /// Whether an extraction or chunk session of the document is running
    pub async fn has_running_session(&self, document_id: &str) -> Result<bool> {
        let running: i64 = sqlx::query_scalar(
            r#"
            SELECT (SELECT COUNT(*) FROM extraction_sessions WHERE document_id = ? AND status = 'running')
                 + (SELECT COUNT(*) FROM chunk_sessions WHERE document_id = ? AND status = 'running')
            "#,
        )
        .bind(document_id)
        .bind(document_id)
        .fetch_one(self.pool())
        .await?;
        Ok(running > 0)
    }

    pub async fn get_extraction_session(&self, id: &str) -> Result<Option<ExtractionSession>> {
        let session =
            sqlx::query_as::<_, ExtractionSession>("SELECT * FROM extraction_sessions WHERE id = ?")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        Ok(session)
    }

    pub async fn get_chunk_session(&self, id: &str) -> Result<Option<ChunkSession>> {
        let session = sqlx::query_as::<_, ChunkSession>("SELECT * FROM chunk_sessions WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(session)
    }

    /// Extraction sessions of a document, newest first
    pub async fn list_extraction_sessions(&self, document_id: &str) -> Result<Vec<ExtractionSession>> {
        let sessions = sqlx::query_as::<_, ExtractionSession>(
            "SELECT * FROM extraction_sessions WHERE document_id = ? ORDER BY started_at DESC",
        )
        .bind(document_id)
        .fetch_all(self.pool())
        .await?;
        Ok(sessions)
    }

    /// Chunk sessions of a document, newest first
    pub async fn list_chunk_sessions(&self, document_id: &str) -> Result<Vec<ChunkSession>> {
        let sessions = sqlx::query_as::<_, ChunkSession>(
            "SELECT * FROM chunk_sessions WHERE document_id = ? ORDER BY started_at DESC",
        )
        .bind(document_id)
        .fetch_all(self.pool())
        .await?;
        Ok(sessions)
    }

    /// `running → success`. Returns false when no running row matched.
    pub async fn mark_session_success(
        &self,
        kind: SessionKind,
        id: &str,
        count: i64,
    ) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET status = 'success', completed_at = ?, {} = ? WHERE id = ? AND status = 'running'",
            kind.table(),
            kind.count_column()
        );
        let result = sqlx::query(&sql)
            .bind(Utc::now().to_rfc3339())
            .bind(count)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `running → failed`, and the owning document moves to failed with the
    /// same message. Returns false when no running row matched.
    pub async fn mark_session_failed(
        &self,
        kind: SessionKind,
        id: &str,
        document_id: &str,
        message: &str,
    ) -> Result<bool> {
        let mut tx = self.pool().begin().await?;
        let sql = format!(
            "UPDATE {} SET status = 'failed', completed_at = ?, error_message = ? WHERE id = ? AND status = 'running'",
            kind.table()
        );
        let result = sqlx::query(&sql)
            .bind(Utc::now().to_rfc3339())
            .bind(message)
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() != 1 {
            return Ok(false);
        }

        mark_document_failed(&mut tx, document_id, message).await?;
        tx.commit().await?;
        Ok(true)
    }
}
