//! Extraction and chunk session state machines.
//!
//! ```text
//! running ──complete──▶ success
//!    │
//!    └────fail────────▶ failed
//! ```
//!
//! Each transition is a single conditional update on a `running` row. When
//! the update matches nothing, the terminal row decides the outcome: a
//! repeat of the same transition is a no-op, anything else is a state error.

use crate::error::{Error, Result};
use crate::meta::{ChunkSession, ExtractionSession, MetaDb, SessionKind, SessionStatus};
use tracing::{debug, info, warn};

/// Truncate on a char boundary to at most `max_chars` characters
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    match message.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => message[..byte_idx].to_string(),
        None => message.to_string(),
    }
}

/// Decide the outcome of a `complete` that matched no running row
fn resolve_complete(
    kind: SessionKind,
    id: &str,
    status: SessionStatus,
    stored: Option<i64>,
    requested: i64,
) -> Result<()> {
    match status {
        SessionStatus::Success if stored == Some(requested) => {
            debug!(session_id = %id, "{} already complete", kind);
            Ok(())
        }
        SessionStatus::Success => Err(Error::State(format!(
            "{} {} already completed with count {:?}, not {}",
            kind, id, stored, requested
        ))),
        SessionStatus::Failed => Err(Error::State(format!(
            "{} {} has failed and cannot complete",
            kind, id
        ))),
        SessionStatus::Running => Err(Error::State(format!(
            "{} {} changed concurrently",
            kind, id
        ))),
    }
}

/// Decide the outcome of a `fail` that matched no running row
fn resolve_fail(kind: SessionKind, id: &str, status: SessionStatus) -> Result<()> {
    match status {
        SessionStatus::Failed => {
            debug!(session_id = %id, "{} already failed", kind);
            Ok(())
        }
        SessionStatus::Success => Err(Error::State(format!(
            "{} {} has succeeded and cannot fail",
            kind, id
        ))),
        SessionStatus::Running => Err(Error::State(format!(
            "{} {} changed concurrently",
            kind, id
        ))),
    }
}

/// Lifecycle of extraction sessions
#[derive(Clone)]
pub struct ExtractionSessionManager {
    db: MetaDb,
    max_error_chars: usize,
}

impl ExtractionSessionManager {
    pub fn new(db: MetaDb, max_error_chars: usize) -> Self {
        Self { db, max_error_chars }
    }

    /// Open a running session; the document moves to `processing`
    pub async fn start(
        &self,
        document_id: &str,
        provider: &str,
        model_profile: &str,
    ) -> Result<ExtractionSession> {
        let session = ExtractionSession::new(
            document_id.to_string(),
            provider.to_string(),
            model_profile.to_string(),
        );
        self.db.insert_extraction_session(&session).await?;
        info!(document_id = %document_id, session_id = %session.id, provider, "Extraction session started");
        Ok(session)
    }

    pub async fn complete(&self, session_id: &str, page_count: usize) -> Result<ExtractionSession> {
        let count = page_count as i64;
        if !self
            .db
            .mark_session_success(SessionKind::Extraction, session_id, count)
            .await?
        {
            let session = self.get(session_id).await?;
            resolve_complete(
                SessionKind::Extraction,
                session_id,
                session.status()?,
                session.page_count,
                count,
            )?;
            return Ok(session);
        }
        debug!(session_id = %session_id, page_count, "Extraction session succeeded");
        self.get(session_id).await
    }

    pub async fn fail(&self, session_id: &str, error_message: &str) -> Result<ExtractionSession> {
        let session = self.get(session_id).await?;
        let message = truncate_message(error_message, self.max_error_chars);
        if !self
            .db
            .mark_session_failed(SessionKind::Extraction, session_id, &session.document_id, &message)
            .await?
        {
            let session = self.get(session_id).await?;
            resolve_fail(SessionKind::Extraction, session_id, session.status()?)?;
            return Ok(session);
        }
        warn!(session_id = %session_id, document_id = %session.document_id, "Extraction session failed: {}", message);
        self.get(session_id).await
    }

    pub async fn get(&self, session_id: &str) -> Result<ExtractionSession> {
        self.db
            .get_extraction_session(session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("extraction session {}", session_id)))
    }
}

/// Lifecycle of chunk sessions
#[derive(Clone)]
pub struct ChunkSessionManager {
    db: MetaDb,
    max_error_chars: usize,
}

impl ChunkSessionManager {
    pub fn new(db: MetaDb, max_error_chars: usize) -> Self {
        Self { db, max_error_chars }
    }

    /// Open a running session over a successful extraction
    pub async fn start(
        &self,
        document_id: &str,
        extraction_session_id: &str,
        strategy_name: &str,
        params: &serde_json::Value,
    ) -> Result<ChunkSession> {
        let extraction = self
            .db
            .get_extraction_session(extraction_session_id)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!("extraction session {}", extraction_session_id))
            })?;

        if extraction.document_id != document_id {
            return Err(Error::Dependency(format!(
                "extraction session {} belongs to document {}",
                extraction_session_id, extraction.document_id
            )));
        }
        if extraction.status()? != SessionStatus::Success {
            return Err(Error::Dependency(format!(
                "extraction session {} is {}, not success",
                extraction_session_id, extraction.status
            )));
        }

        let session = ChunkSession::new(
            document_id.to_string(),
            extraction_session_id.to_string(),
            strategy_name.to_string(),
            serde_json::to_string(params)?,
        );
        self.db.insert_chunk_session(&session).await?;
        info!(document_id = %document_id, session_id = %session.id, strategy = strategy_name, "Chunk session started");
        Ok(session)
    }

    pub async fn complete(&self, session_id: &str, chunk_count: usize) -> Result<ChunkSession> {
        let count = chunk_count as i64;
        if !self
            .db
            .mark_session_success(SessionKind::Chunk, session_id, count)
            .await?
        {
            let session = self.get(session_id).await?;
            resolve_complete(
                SessionKind::Chunk,
                session_id,
                session.status()?,
                session.chunk_count,
                count,
            )?;
            return Ok(session);
        }
        debug!(session_id = %session_id, chunk_count, "Chunk session succeeded");
        self.get(session_id).await
    }

    pub async fn fail(&self, session_id: &str, error_message: &str) -> Result<ChunkSession> {
        let session = self.get(session_id).await?;
        let message = truncate_message(error_message, self.max_error_chars);
        if !self
            .db
            .mark_session_failed(SessionKind::Chunk, session_id, &session.document_id, &message)
            .await?
        {
            let session = self.get(session_id).await?;
            resolve_fail(SessionKind::Chunk, session_id, session.status()?)?;
            return Ok(session);
        }
        warn!(session_id = %session_id, document_id = %session.document_id, "Chunk session failed: {}", message);
        self.get(session_id).await
    }

    pub async fn get(&self, session_id: &str) -> Result<ChunkSession> {
        self.db
            .get_chunk_session(session_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("chunk session {}", session_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::tests::{insert_test_document, setup_test_db};
    use crate::meta::ProcessingStatus;
    use serde_json::json;

    #[test]
    fn test_truncate_on_char_boundary() {
        assert_eq!(truncate_message("short", 10), "short");
        assert_eq!(truncate_message("abcdef", 3), "abc");
        // Multi-byte characters are never split
        assert_eq!(truncate_message("한국어오류", 2), "한국");
    }

    #[tokio::test]
    async fn test_second_start_conflicts() {
        let (db, _tmp) = setup_test_db().await;
        let doc = insert_test_document(&db, "c1").await;
        let manager = ExtractionSessionManager::new(db.clone(), 1000);

        manager.start(&doc.id, "local", "default").await.unwrap();
        let err = manager.start(&doc.id, "local", "default").await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let loaded = db.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(loaded.status().unwrap(), ProcessingStatus::Processing);
    }

    #[tokio::test]
    async fn test_concurrent_starts_one_wins() {
        let (db, _tmp) = setup_test_db().await;
        let doc = insert_test_document(&db, "c1").await;
        let manager = ExtractionSessionManager::new(db.clone(), 1000);

        let (a, b) = tokio::join!(
            manager.start(&doc.id, "local", "default"),
            manager.start(&doc.id, "local", "default")
        );
        let oks = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(oks, 1);
    }

    #[tokio::test]
    async fn test_start_unknown_or_deleted_document() {
        let (db, _tmp) = setup_test_db().await;
        let manager = ExtractionSessionManager::new(db.clone(), 1000);
        assert!(matches!(
            manager.start("missing", "local", "default").await,
            Err(Error::NotFound(_))
        ));

        let doc = insert_test_document(&db, "c1").await;
        db.soft_delete_document(&doc.id).await.unwrap();
        assert!(matches!(
            manager.start(&doc.id, "local", "default").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_complete_transitions() {
        let (db, _tmp) = setup_test_db().await;
        let doc = insert_test_document(&db, "c1").await;
        let manager = ExtractionSessionManager::new(db.clone(), 1000);
        let session = manager.start(&doc.id, "local", "default").await.unwrap();

        let done = manager.complete(&session.id, 3).await.unwrap();
        assert_eq!(done.status().unwrap(), SessionStatus::Success);
        assert_eq!(done.page_count, Some(3));
        assert!(done.completed_at.is_some());

        // Same count again is a no-op
        manager.complete(&session.id, 3).await.unwrap();
        // A different count is illegal
        assert!(matches!(
            manager.complete(&session.id, 4).await,
            Err(Error::State(_))
        ));
        // So is failing a successful session
        assert!(matches!(
            manager.fail(&session.id, "late").await,
            Err(Error::State(_))
        ));
        assert!(matches!(
            manager.complete("missing", 1).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_fail_transitions() {
        let (db, _tmp) = setup_test_db().await;
        let doc = insert_test_document(&db, "c1").await;
        let manager = ExtractionSessionManager::new(db.clone(), 5);
        let session = manager.start(&doc.id, "local", "default").await.unwrap();

        let failed = manager.fail(&session.id, "extraction crashed").await.unwrap();
        assert_eq!(failed.status().unwrap(), SessionStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("extra"));

        let loaded = db.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(loaded.status().unwrap(), ProcessingStatus::Failed);
        assert_eq!(loaded.last_error.as_deref(), Some("extra"));

        // Repeated failure is a no-op, completion is not
        manager.fail(&session.id, "again").await.unwrap();
        assert!(matches!(
            manager.complete(&session.id, 1).await,
            Err(Error::State(_))
        ));

        // A failed session frees the document for a new run
        manager.start(&doc.id, "local", "default").await.unwrap();
    }

    #[tokio::test]
    async fn test_chunk_session_requires_successful_extraction() {
        let (db, _tmp) = setup_test_db().await;
        let doc = insert_test_document(&db, "c1").await;
        let extraction = ExtractionSessionManager::new(db.clone(), 1000);
        let chunking = ChunkSessionManager::new(db.clone(), 1000);
        let params = json!({ "max_chars": 1500 });

        let ext = extraction.start(&doc.id, "local", "default").await.unwrap();
        assert!(matches!(
            chunking.start(&doc.id, &ext.id, "modality_aware", &params).await,
            Err(Error::Dependency(_))
        ));
        assert!(matches!(
            chunking.start(&doc.id, "missing", "modality_aware", &params).await,
            Err(Error::NotFound(_))
        ));

        extraction.complete(&ext.id, 2).await.unwrap();
        let session = chunking
            .start(&doc.id, &ext.id, "modality_aware", &params)
            .await
            .unwrap();
        assert!(matches!(
            chunking.start(&doc.id, &ext.id, "modality_aware", &params).await,
            Err(Error::Conflict(_))
        ));

        let done = chunking.complete(&session.id, 7).await.unwrap();
        assert_eq!(done.chunk_count, Some(7));
        assert_eq!(done.params_json, r#"{"max_chars":1500}"#);
    }
}
