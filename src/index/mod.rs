//! Query layer over the metadata database and the vector collections.
//!
//! Three primitives are exposed through [`SearchIndex`], each independently
//! callable and each returning only visible chunks inside the requested
//! scope:
//! - dense-vector similarity (text or cross-modal collection)
//! - keyword overlap against per-chunk keyword rows
//! - lexical full-text over the two FTS5 tables

use crate::chunk::{normalize_keyword, query_keywords};
use crate::embed::EmbeddingResult;
use crate::error::{Error, Result};
use crate::meta::{
    ChunkHit, ChunkRecord, EmbeddingRecord, FtsTable, MetaDb, Modality, SearchScope, VectorKind,
};
use crate::models::DimensionRegistry;
use crate::store::{ChunkPayload, ChunkPoint, SearchFilter, VectorStore};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Weight of the stemmed primary-language full-text table
pub const PRIMARY_LANGUAGE_WEIGHT: f32 = 2.0;
/// Weight of the trigram fallback full-text table
pub const FALLBACK_WEIGHT: f32 = 1.0;

/// Trigram tokens need at least three characters to match anything
const TRIGRAM_MIN_CHARS: usize = 3;

/// Extra metadata carried with a search hit
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChunkMetadata {
    pub page_no: Option<i64>,
    pub title: Option<String>,
}

/// A chunk returned by a search primitive. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchChunk {
    pub chunk_id: String,
    pub document_id: String,
    pub content: String,
    pub score: f32,
    pub modality: Modality,
    pub metadata: ChunkMetadata,
}

impl SearchChunk {
    fn from_hit(hit: ChunkHit, score: f32) -> Result<Self> {
        Ok(Self {
            modality: hit.modality.parse()?,
            chunk_id: hit.chunk_id,
            document_id: hit.document_id,
            content: hit.content_text,
            score,
            metadata: ChunkMetadata {
                page_no: hit.page_no,
                title: hit.title,
            },
        })
    }
}

/// A query vector and the space it was embedded in
#[derive(Debug, Clone)]
pub struct VectorQuery {
    pub vector: Vec<f32>,
    pub space: VectorKind,
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Cosine search in the collection for `query.space`
    async fn vector_search(
        &self,
        query: &VectorQuery,
        top_k: usize,
        min_similarity: f32,
        scope: &SearchScope,
    ) -> Result<Vec<SearchChunk>>;

    /// Overlap score: matched keywords / query keywords
    async fn keyword_search(
        &self,
        keywords: &[String],
        top_k: usize,
        scope: &SearchScope,
    ) -> Result<Vec<SearchChunk>>;

    /// Weighted full-text relevance over both FTS tables
    async fn fulltext_search(
        &self,
        query_text: &str,
        top_k: usize,
        scope: &SearchScope,
    ) -> Result<Vec<SearchChunk>>;
}

/// Map a raw bm25 value (negative, lower is better) into (0, 1)
pub fn bm25_relevance(bm25: f64) -> f32 {
    let s = (-bm25).max(1e-6);
    (s / (1.0 + s)) as f32
}

/// FTS5 expression matching any of the tokens
pub fn fts_match_expression<'a>(tokens: impl IntoIterator<Item = &'a str>) -> String {
    tokens
        .into_iter()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// [`SearchIndex`] over the metadata database plus one vector store per kind
pub struct IndexStore {
    db: MetaDb,
    text: Arc<dyn VectorStore>,
    visual: Option<Arc<dyn VectorStore>>,
}

impl IndexStore {
    pub fn new(db: MetaDb, text: Arc<dyn VectorStore>, visual: Option<Arc<dyn VectorStore>>) -> Self {
        Self { db, text, visual }
    }

    pub fn db(&self) -> &MetaDb {
        &self.db
    }

    pub fn store(&self, kind: VectorKind) -> Option<&Arc<dyn VectorStore>> {
        match kind {
            VectorKind::Text => Some(&self.text),
            VectorKind::Visual => self.visual.as_ref(),
        }
    }

    /// Create the vector collections if needed
    pub async fn ensure_collections(&self) -> Result<()> {
        self.text.ensure_collection().await?;
        if let Some(visual) = &self.visual {
            visual.ensure_collection().await?;
        }
        Ok(())
    }

    /// Point counts per collection
    pub async fn collection_counts(&self) -> Result<Vec<(String, usize)>> {
        let mut counts = vec![(self.text.collection().to_string(), self.text.count().await?)];
        if let Some(visual) = &self.visual {
            counts.push((visual.collection().to_string(), visual.count().await?));
        }
        Ok(counts)
    }

    /// Write the vectors of `results` and their embedding rows.
    ///
    /// Every vector is checked against `registry` first, so a mismatch
    /// writes nothing. Points are upserted before the rows that reference
    /// them. Returns the number of vectors written.
    pub async fn index_embeddings(
        &self,
        container_id: &str,
        chunks: &[ChunkRecord],
        results: &[EmbeddingResult],
        models: &HashMap<VectorKind, String>,
        registry: &DimensionRegistry,
    ) -> Result<usize> {
        let by_id: HashMap<&str, &ChunkRecord> = chunks.iter().map(|c| (c.id.as_str(), c)).collect();
        let now = Utc::now().to_rfc3339();

        let mut points: HashMap<VectorKind, Vec<ChunkPoint>> = HashMap::new();
        let mut records = Vec::new();

        for result in results {
            let chunk = by_id.get(result.chunk_id.as_str()).ok_or_else(|| {
                Error::NotFound(format!("chunk {} for embedding", result.chunk_id))
            })?;
            let modality = chunk.modality()?;

            for (kind, vector) in [
                (VectorKind::Text, result.text.as_ref()),
                (VectorKind::Visual, result.visual.as_ref()),
            ] {
                let Some(vector) = vector else { continue };
                let model = models.get(&kind).ok_or_else(|| {
                    Error::Config(format!("no {} embedding model configured", kind))
                })?;
                registry.validate(model, vector.len())?;

                let record = EmbeddingRecord::new(&chunk.id, model, vector.len(), modality, kind);
                let id = Uuid::parse_str(&record.point_id)
                    .map_err(|e| Error::Other(format!("Invalid point id: {}", e)))?;
                points.entry(kind).or_default().push(ChunkPoint {
                    id,
                    vector: vector.clone(),
                    payload: ChunkPayload {
                        chunk_id: chunk.id.clone(),
                        document_id: chunk.document_id.clone(),
                        container_id: container_id.to_string(),
                        modality,
                        vector_kind: kind,
                        page_no: chunk.page_no,
                        chunk_index: chunk.chunk_index,
                        updated_at: now.clone(),
                    },
                });
                records.push(record);
            }
        }

        for (kind, batch) in points {
            let store = self.store(kind).ok_or_else(|| {
                Error::Config(format!("no vector store for {} embeddings", kind))
            })?;
            store.upsert_points(batch).await?;
        }
        self.db.insert_embeddings(&records, registry).await?;

        debug!(vectors = records.len(), "Indexed embeddings");
        Ok(records.len())
    }

    async fn fulltext_table(
        &self,
        table: FtsTable,
        tokens: &[&str],
        top_k: usize,
        scope: &SearchScope,
    ) -> Result<Vec<ChunkHit>> {
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let expr = fts_match_expression(tokens.iter().copied());
        self.db.fulltext_search_chunks(table, &expr, top_k, scope).await
    }
}

#[async_trait]
impl SearchIndex for IndexStore {
    async fn vector_search(
        &self,
        query: &VectorQuery,
        top_k: usize,
        min_similarity: f32,
        scope: &SearchScope,
    ) -> Result<Vec<SearchChunk>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let store = self.store(query.space).ok_or_else(|| {
            Error::Config(format!("no vector store for {} queries", query.space))
        })?;

        let filter = SearchFilter {
            container_ids: scope.container_ids.clone(),
            document_ids: scope.document_ids.clone(),
        };
        // Over-fetch: points of superseded or deleted chunks are dropped below
        let hits = store
            .search(query.vector.clone(), top_k * 2, Some(min_similarity), &filter)
            .await?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = hits.iter().map(|h| h.payload.chunk_id.clone()).collect();
        let mut visible: HashMap<String, ChunkHit> = self
            .db
            .visible_chunks(&ids, scope)
            .await?
            .into_iter()
            .map(|hit| (hit.chunk_id.clone(), hit))
            .collect();

        let mut results = Vec::with_capacity(top_k);
        for hit in hits {
            if let Some(row) = visible.remove(&hit.payload.chunk_id) {
                results.push(SearchChunk::from_hit(row, hit.score)?);
                if results.len() == top_k {
                    break;
                }
            }
        }
        Ok(results)
    }

    async fn keyword_search(
        &self,
        keywords: &[String],
        top_k: usize,
        scope: &SearchScope,
    ) -> Result<Vec<SearchChunk>> {
        let mut normalized: Vec<String> = Vec::new();
        for keyword in keywords.iter().filter_map(|k| normalize_keyword(k)) {
            if !normalized.contains(&keyword) {
                normalized.push(keyword);
            }
        }
        if normalized.is_empty() {
            return Ok(Vec::new());
        }

        let total = normalized.len() as f64;
        self.db
            .keyword_search_chunks(&normalized, top_k, scope)
            .await?
            .into_iter()
            .map(|hit| {
                let score = (hit.score / total) as f32;
                SearchChunk::from_hit(hit, score)
            })
            .collect()
    }

    async fn fulltext_search(
        &self,
        query_text: &str,
        top_k: usize,
        scope: &SearchScope,
    ) -> Result<Vec<SearchChunk>> {
        let keywords = query_keywords(query_text);
        if keywords.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let primary_tokens: Vec<&str> = keywords.iter().map(String::as_str).collect();
        let fallback_tokens: Vec<&str> = primary_tokens
            .iter()
            .copied()
            .filter(|t| t.chars().count() >= TRIGRAM_MIN_CHARS)
            .collect();

        let primary = self
            .fulltext_table(FtsTable::Primary, &primary_tokens, top_k, scope)
            .await?;
        let fallback = self
            .fulltext_table(FtsTable::Fallback, &fallback_tokens, top_k, scope)
            .await?;

        let mut combined: HashMap<String, (ChunkHit, f32)> = HashMap::new();
        for (hits, weight) in [(primary, PRIMARY_LANGUAGE_WEIGHT), (fallback, FALLBACK_WEIGHT)] {
            for hit in hits {
                let part = weight * bm25_relevance(hit.score);
                combined
                    .entry(hit.chunk_id.clone())
                    .and_modify(|(_, score)| *score += part)
                    .or_insert((hit, part));
            }
        }

        let mut results = combined
            .into_values()
            .map(|(hit, score)| SearchChunk::from_hit(hit, score))
            .collect::<Result<Vec<_>>>()?;
        results.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        results.truncate(top_k);
        Ok(results)
    }
}
