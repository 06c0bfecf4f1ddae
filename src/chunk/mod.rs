//! Modality-aware chunking
//!
//! This module turns the extracted objects of a document into chunks:
//! - Consecutive TEXT objects of a page are joined and split at paragraph,
//!   sentence or word boundaries with overlap
//! - Every TABLE becomes one chunk holding its pipe rendering
//! - Every IMAGE/FIGURE becomes one chunk holding its caption
//! - Chunks repeating an earlier chunk's content are dropped after their
//!   index was assigned, so indices may have gaps. Image chunks hash their
//!   source object too, so two images are never merged.

mod boundaries;
mod keywords;

pub use boundaries::*;
pub use keywords::*;

use crate::config::ChunkConfig;
use crate::error::Result;
use crate::extract::ObjectStructure;
use crate::meta::{ExtractedObject, Modality, ObjectType};
use blake3::Hasher;
use std::collections::HashSet;
use tracing::debug;

/// Name recorded on chunk sessions for this strategy
pub const MODALITY_AWARE: &str = "modality_aware";

/// A chunk before it is bound to a session
#[derive(Debug, Clone)]
pub struct ChunkDraft {
    /// Position in the session (unique, may have gaps)
    pub index: usize,
    pub modality: Modality,
    pub text: String,
    /// Blake3 hash of modality + text (+ source object for images)
    pub content_hash: String,
    pub token_count: usize,
    pub char_count: usize,
    pub page_no: Option<u32>,
    pub source_object_id: Option<String>,
    pub keywords: Vec<String>,
    pub asset_path: Option<String>,
}

impl ChunkDraft {
    fn new(
        index: usize,
        modality: Modality,
        text: String,
        page_no: u32,
        source: &ExtractedObject,
        config: &ChunkConfig,
    ) -> Self {
        let content_hash = match modality {
            Modality::Image => compute_chunk_hash(modality, &format!("{}\0{}", text, source.id)),
            _ => compute_chunk_hash(modality, &text),
        };
        Self {
            index,
            content_hash,
            token_count: estimate_tokens(&text),
            char_count: text.chars().count(),
            keywords: extract_keywords(&text, config.max_keywords),
            page_no: Some(page_no),
            source_object_id: Some(source.id.clone()),
            asset_path: source.asset_path.clone(),
            modality,
            text,
        }
    }
}

/// Chunking parameters recorded on the session
pub fn chunk_params(config: &ChunkConfig) -> serde_json::Value {
    serde_json::json!({
        "max_chars": config.max_chars,
        "min_chars": config.min_chars,
        "overlap_chars": config.overlap_chars,
        "max_keywords": config.max_keywords,
    })
}

/// Chunk the objects of one extraction session (in page/sequence order)
pub fn chunk_objects(objects: &[ExtractedObject], config: &ChunkConfig) -> Result<Vec<ChunkDraft>> {
    let mut drafts = Vec::new();
    let mut next_index = 0usize;
    let mut pending_text: Vec<&ExtractedObject> = Vec::new();
    let mut current_page: Option<i64> = None;

    for obj in objects {
        if current_page != Some(obj.page_no) {
            flush_text(&mut pending_text, config, &mut next_index, &mut drafts);
            current_page = Some(obj.page_no);
        }

        match obj.object_type()? {
            ObjectType::Text => pending_text.push(obj),
            ObjectType::Table => {
                flush_text(&mut pending_text, config, &mut next_index, &mut drafts);
                let text = table_text(obj)?;
                if !text.trim().is_empty() {
                    drafts.push(ChunkDraft::new(
                        next_index,
                        Modality::Table,
                        text,
                        obj.page_no as u32,
                        obj,
                        config,
                    ));
                    next_index += 1;
                }
            }
            ObjectType::Image | ObjectType::Figure => {
                flush_text(&mut pending_text, config, &mut next_index, &mut drafts);
                let text = image_text(obj)?;
                drafts.push(ChunkDraft::new(
                    next_index,
                    Modality::Image,
                    text,
                    obj.page_no as u32,
                    obj,
                    config,
                ));
                next_index += 1;
            }
        }
    }
    flush_text(&mut pending_text, config, &mut next_index, &mut drafts);

    // Drop repeated content; indices of survivors are kept
    let mut seen = HashSet::new();
    let before = drafts.len();
    drafts.retain(|d| seen.insert(d.content_hash.clone()));
    if drafts.len() != before {
        debug!("Dropped {} duplicate chunks", before - drafts.len());
    }

    Ok(drafts)
}

/// Join buffered TEXT objects of one page and split them into chunks
fn flush_text(
    pending: &mut Vec<&ExtractedObject>,
    config: &ChunkConfig,
    next_index: &mut usize,
    drafts: &mut Vec<ChunkDraft>,
) {
    if pending.is_empty() {
        return;
    }

    // Byte offset at which each object starts in the joined text
    let mut text = String::new();
    let mut starts: Vec<(usize, &ExtractedObject)> = Vec::new();
    for obj in pending.iter() {
        let content = obj.text_content.as_deref().unwrap_or("").trim();
        if content.is_empty() {
            continue;
        }
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        starts.push((text.len(), obj));
        text.push_str(content);
    }

    for (start, span) in split_text(&text, config) {
        let source = starts
            .iter()
            .rev()
            .find(|(offset, _)| *offset <= start)
            .or_else(|| starts.first())
            .map(|(_, obj)| *obj);
        if let Some(source) = source {
            drafts.push(ChunkDraft::new(
                *next_index,
                Modality::Text,
                span,
                source.page_no as u32,
                source,
                config,
            ));
            *next_index += 1;
        }
    }

    pending.clear();
}

fn table_text(obj: &ExtractedObject) -> Result<String> {
    if let Some(json) = &obj.structure_json {
        let structure: ObjectStructure = serde_json::from_str(json)?;
        if let Some(rendered) = structure.render_table() {
            return Ok(rendered);
        }
    }
    Ok(obj.text_content.clone().unwrap_or_default())
}

fn image_text(obj: &ExtractedObject) -> Result<String> {
    let mut caption = obj.text_content.clone().filter(|t| !t.trim().is_empty());
    if caption.is_none() {
        if let Some(json) = &obj.structure_json {
            if let ObjectStructure::Image { caption: c, .. } = serde_json::from_str(json)? {
                caption = c.filter(|t| !t.trim().is_empty());
            }
        }
    }
    Ok(caption.unwrap_or_else(|| format!("Image on page {}", obj.page_no)))
}

/// Split text into `(byte_start, chunk_text)` spans no longer than
/// `max_chars` bytes, preferring the strongest break point in the last
/// two fifths of the window
pub fn split_text(text: &str, config: &ChunkConfig) -> Vec<(usize, String)> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let break_points = find_break_points(text);
    let code_blocks = find_code_blocks(text);
    let mut spans = Vec::new();
    let mut current_start = 0;

    while current_start < text.len() {
        current_start = ensure_char_boundary(text, current_start);
        if current_start >= text.len() {
            break;
        }

        let target_end = current_start + config.max_chars;
        let chunk_end = if target_end >= text.len() {
            text.len()
        } else {
            find_best_break(text, current_start, target_end, &break_points, &code_blocks)
        };

        let chunk_end = ensure_char_boundary(text, chunk_end);
        if chunk_end <= current_start {
            // A single character wider than the window
            let next = text[current_start..]
                .chars()
                .next()
                .map(|c| current_start + c.len_utf8())
                .unwrap_or(text.len());
            spans.push((current_start, text[current_start..next].to_string()));
            current_start = next;
            continue;
        }

        let chunk_text = text[current_start..chunk_end].trim();

        // Skip if too small (unless it's the last chunk)
        let is_last = chunk_end >= text.len();
        if !chunk_text.is_empty() && (chunk_text.len() >= config.min_chars || is_last || spans.is_empty()) {
            spans.push((current_start, chunk_text.to_string()));
        }

        if is_last {
            break;
        }

        // Move to next chunk with overlap, always making progress
        let overlapped = ensure_char_boundary(text, chunk_end.saturating_sub(config.overlap_chars));
        current_start = if overlapped > current_start {
            overlapped
        } else {
            chunk_end
        };
    }

    spans
}

/// Find potential break points in the text
fn find_break_points(text: &str) -> Vec<BreakPoint> {
    let mut points = Vec::new();

    for (i, _) in text.match_indices("\n\n") {
        points.push(BreakPoint::new(i + 2, BreakPriority::Paragraph));
    }

    for pattern in [". ", ".\n", "? ", "! ", "。", "다. "] {
        for (i, _) in text.match_indices(pattern) {
            points.push(BreakPoint::new(i + pattern.len(), BreakPriority::Sentence));
        }
    }

    points.retain(|p| p.position <= text.len() && text.is_char_boundary(p.position));
    // Strongest priority wins when two kinds land on one position
    points.sort_by(|a, b| a.position.cmp(&b.position).then(b.priority.cmp(&a.priority)));
    points.dedup_by_key(|p| p.position);
    points
}

/// Ensure a position is on a valid UTF-8 character boundary
fn ensure_char_boundary(text: &str, pos: usize) -> usize {
    if pos >= text.len() {
        return text.len();
    }
    let mut adjusted = pos;
    while adjusted > 0 && !text.is_char_boundary(adjusted) {
        adjusted -= 1;
    }
    adjusted
}

/// Find the best break point at or before the target position
fn find_best_break(
    text: &str,
    start: usize,
    target: usize,
    break_points: &[BreakPoint],
    code_blocks: &[(usize, usize)],
) -> usize {
    let window = target - start;
    let min_pos = ensure_char_boundary(text, start + window * 3 / 5);
    let max_pos = ensure_char_boundary(text, target.min(text.len()));

    let best = break_points
        .iter()
        .filter(|p| p.position > start && p.position >= min_pos && p.position <= max_pos)
        .filter(|p| !is_in_code_block(p.position, code_blocks))
        .max_by(|a, b| a.priority.cmp(&b.priority).then(a.position.cmp(&b.position)));
    if let Some(best) = best {
        return best.position;
    }

    // Fall back to the last word boundary in the window
    let window_text = &text[min_pos..max_pos];
    for (i, c) in window_text.char_indices().rev() {
        if c.is_whitespace() {
            let pos = min_pos + i + c.len_utf8();
            if pos > start {
                return pos;
            }
        }
    }

    max_pos
}

/// Hash of a chunk's content, distinguishing modalities
pub fn compute_chunk_hash(modality: Modality, text: &str) -> String {
    let mut hasher = Hasher::new();
    hasher.update(modality.to_string().as_bytes());
    hasher.update(&[0]);
    hasher.update(text.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Compute a stable hash for document content
pub fn compute_content_hash(content: &[u8]) -> String {
    let mut hasher = Hasher::new();
    hasher.update(content);
    hasher.finalize().to_hex().to_string()
}
