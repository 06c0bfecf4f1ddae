//! Per-document inspection: session history and duplicate flags

use crate::error::{Error, Result};
use crate::meta::{
    ChunkSession, Document, DuplicateImage, ExtractionSession, MetaDb, SearchIndexRow,
};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SessionHistory {
    pub document: Document,
    pub extraction_sessions: Vec<ExtractionSession>,
    pub chunk_sessions: Vec<ChunkSession>,
    /// Search record of the published chunk session
    pub search_record: Option<SearchIndexRow>,
}

async fn require_document(db: &MetaDb, document_id: &str) -> Result<Document> {
    db.get_document(document_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("document {}", document_id)))
}

pub async fn cmd_sessions(db: &MetaDb, document_id: &str) -> Result<SessionHistory> {
    let document = require_document(db, document_id).await?;
    Ok(SessionHistory {
        extraction_sessions: db.list_extraction_sessions(document_id).await?,
        chunk_sessions: db.list_chunk_sessions(document_id).await?,
        search_record: db.get_search_record(document_id).await?,
        document,
    })
}

pub async fn cmd_duplicates(db: &MetaDb, document_id: &str) -> Result<Vec<DuplicateImage>> {
    require_document(db, document_id).await?;
    db.list_duplicates(document_id).await
}

pub fn print_sessions(history: &SessionHistory) {
    let doc = &history.document;
    println!("\n📄 {}", doc.title.as_deref().unwrap_or(&doc.uri));
    println!("  ID: {}", doc.id);
    println!("  Container: {}", doc.container_id);
    println!("  Status: {}", doc.processing_status);
    if let Some(error) = &doc.last_error {
        println!("  Last error: {}", error);
    }
    if let Some(active) = &doc.active_chunk_session_id {
        println!("  Active chunk session: {}", active);
    }
    if let Some(record) = &history.search_record {
        println!(
            "  Searchable: {} chunks, {} text / {} visual embeddings",
            record.chunk_count, record.text_embeddings, record.visual_embeddings
        );
    }

    println!("\nExtraction sessions:");
    for session in &history.extraction_sessions {
        println!(
            "  {} [{}] {} / {} started {}{}",
            session.id,
            session.status,
            session.provider,
            session.model_profile,
            session.started_at,
            session
                .page_count
                .map(|p| format!(", {} pages", p))
                .unwrap_or_default()
        );
        if let Some(error) = &session.error_message {
            println!("    ✗ {}", error);
        }
    }

    println!("\nChunk sessions:");
    for session in &history.chunk_sessions {
        let active = doc.active_chunk_session_id.as_deref() == Some(session.id.as_str());
        println!(
            "  {} [{}] {} started {}{}{}",
            session.id,
            session.status,
            session.strategy_name,
            session.started_at,
            session
                .chunk_count
                .map(|c| format!(", {} chunks", c))
                .unwrap_or_default(),
            if active { " (active)" } else { "" }
        );
        if let Some(error) = &session.error_message {
            println!("    ✗ {}", error);
        }
    }
}

pub fn print_duplicates(document_id: &str, duplicates: &[DuplicateImage]) {
    if duplicates.is_empty() {
        println!("No near-duplicate images flagged for {}", document_id);
        return;
    }
    println!("\n🖼  Near-duplicate images for {}\n", document_id);
    for dup in duplicates {
        println!(
            "  {} ≈ {} (distance {})",
            dup.object_id, dup.duplicate_of, dup.distance
        );
    }
}
