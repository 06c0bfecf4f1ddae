//! Document extraction
//!
//! Extractors turn a source file into page-ordered objects (TEXT, TABLE,
//! IMAGE, FIGURE). Two providers exist:
//! - `local`: text, markdown and image files, parsed in-process
//! - `http`: a layout-extraction sidecar for PDFs and office formats

mod http_backend;
mod local;

pub use http_backend::*;
pub use local::*;

use crate::backend::RetryPolicy;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::ObjectType;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Structured payload of TABLE and IMAGE objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectStructure {
    Table {
        header: Vec<String>,
        rows: Vec<Vec<String>>,
    },
    Image {
        #[serde(default)]
        caption: Option<String>,
        #[serde(default)]
        format: Option<String>,
    },
}

impl ObjectStructure {
    /// Pipe-table rendering of a table, `None` for other structures
    pub fn render_table(&self) -> Option<String> {
        let ObjectStructure::Table { header, rows } = self else {
            return None;
        };

        let width = header
            .len()
            .max(rows.iter().map(|r| r.len()).max().unwrap_or(0));
        if width == 0 {
            return None;
        }

        let render_row = |cells: &[String]| {
            let mut padded: Vec<&str> = cells.iter().map(|c| c.trim()).collect();
            padded.resize(width, "");
            format!("| {} |", padded.join(" | "))
        };

        let mut lines = Vec::with_capacity(rows.len() + 2);
        if !header.is_empty() {
            lines.push(render_row(header));
            lines.push(format!("| {} |", vec!["---"; width].join(" | ")));
        }
        for row in rows {
            lines.push(render_row(row));
        }
        Some(lines.join("\n"))
    }
}

/// Axis-aligned bounding box on a page
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

/// An object as produced by an extractor, before it is persisted
#[derive(Debug, Clone)]
pub struct RawObject {
    pub object_type: ObjectType,
    /// 1-based page number
    pub page_no: u32,
    pub sequence_in_page: u32,
    pub bbox: Option<BoundingBox>,
    pub text: Option<String>,
    pub structure: Option<ObjectStructure>,
    /// Raw image bytes for IMAGE/FIGURE objects
    pub image: Option<Vec<u8>>,
    /// File extension of the image bytes, with leading dot
    pub image_ext: Option<String>,
}

impl RawObject {
    pub fn text(page_no: u32, sequence_in_page: u32, text: String) -> Self {
        Self {
            object_type: ObjectType::Text,
            page_no,
            sequence_in_page,
            bbox: None,
            text: Some(text),
            structure: None,
            image: None,
            image_ext: None,
        }
    }
}

/// Result of extracting one document
#[derive(Debug, Clone, Default)]
pub struct ExtractedContent {
    pub title: Option<String>,
    pub page_count: usize,
    pub objects: Vec<RawObject>,
}

/// What to extract
#[derive(Debug, Clone)]
pub struct ExtractionSource {
    pub path: PathBuf,
    pub document_type: String,
    pub model_profile: String,
}

/// Trait for extraction providers
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Provider name recorded on extraction sessions
    fn provider(&self) -> &str;

    async fn extract(&self, source: &ExtractionSource) -> Result<ExtractedContent>;
}

/// Create the extractor selected by configuration
pub fn create_extractor(config: &Config) -> Result<Arc<dyn Extractor>> {
    match config.extraction.provider.as_str() {
        "local" => Ok(Arc::new(LocalExtractor::new())),
        "http" => Ok(Arc::new(HttpExtractor::new(
            &config.extraction.backend_url,
            Duration::from_secs(config.extraction.timeout_secs),
            RetryPolicy::new(config.ingest.embed_retries, config.ingest.retry_backoff_ms),
        )?)),
        other => Err(Error::Config(format!(
            "Unknown extraction provider '{}'",
            other
        ))),
    }
}

/// Infer a document type from a file extension
pub fn detect_document_type(path: &Path) -> String {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "md" | "markdown" => "markdown".to_string(),
        "txt" | "text" => "text".to_string(),
        "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" => "image".to_string(),
        "" => "text".to_string(),
        other => other.to_string(),
    }
}

/// Store image bytes under `assets_dir` named by their blake3 hash.
/// Existing files are reused.
pub async fn cache_asset(assets_dir: &Path, bytes: &[u8], ext: &str) -> Result<PathBuf> {
    tokio::fs::create_dir_all(assets_dir).await?;
    let hash = blake3::hash(bytes).to_hex().to_string();
    let target = assets_dir.join(format!("{}{}", hash, ext));
    if tokio::fs::metadata(&target).await.is_err() {
        tokio::fs::write(&target, bytes).await?;
        debug!(path = %target.display(), size = bytes.len(), "Cached image asset");
    }
    Ok(target)
}
