//! SQL-side search primitives over visible chunks.
//!
//! A chunk is visible when its document is live and its session is the one
//! the document published on completion.

use super::MetaDb;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite};

/// Container / document restriction applied to every search primitive
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchScope {
    #[serde(default)]
    pub container_ids: Vec<String>,
    #[serde(default)]
    pub document_ids: Vec<String>,
}

impl SearchScope {
    fn push_filters(&self, qb: &mut QueryBuilder<'_, Sqlite>) {
        if !self.container_ids.is_empty() {
            qb.push(" AND d.container_id IN (");
            let mut sep = qb.separated(", ");
            for id in &self.container_ids {
                sep.push_bind(id.clone());
            }
            qb.push(")");
        }
        if !self.document_ids.is_empty() {
            qb.push(" AND d.id IN (");
            let mut sep = qb.separated(", ");
            for id in &self.document_ids {
                sep.push_bind(id.clone());
            }
            qb.push(")");
        }
    }
}

/// Full-text table to query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FtsTable {
    /// Stemmed, diacritic-folded primary-language tokens
    Primary,
    /// Trigram substrings for CJK and loosely tokenized text
    Fallback,
}

impl FtsTable {
    fn name(&self) -> &'static str {
        match self {
            FtsTable::Primary => "chunk_fts_primary",
            FtsTable::Fallback => "chunk_fts_fallback",
        }
    }
}

/// A chunk returned by a SQL-side search, with the raw strategy score
#[derive(Debug, Clone, FromRow)]
pub struct ChunkHit {
    pub chunk_id: String,
    pub document_id: String,
    pub content_text: String,
    pub modality: String,
    pub page_no: Option<i64>,
    pub title: Option<String>,
    pub score: f64,
}

const HIT_COLUMNS: &str = r#"
    c.id AS chunk_id,
    c.document_id AS document_id,
    c.content_text AS content_text,
    c.modality AS modality,
    c.page_no AS page_no,
    d.title AS title
"#;

const VISIBLE: &str = " d.deleted_at IS NULL AND c.chunk_session_id = d.active_chunk_session_id";

impl MetaDb {
    /// Visible chunks carrying any of `keywords`; `score` is the number of
    /// distinct query keywords matched
    pub async fn keyword_search_chunks(
        &self,
        keywords: &[String],
        top_k: usize,
        scope: &SearchScope,
    ) -> Result<Vec<ChunkHit>> {
        if keywords.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT ");
        qb.push(HIT_COLUMNS);
        qb.push(
            r#",
            CAST(COUNT(DISTINCT k.keyword) AS REAL) AS score
            FROM chunk_keywords k
            JOIN chunks c ON c.id = k.chunk_id
            JOIN documents d ON d.id = c.document_id
            WHERE"#,
        );
        qb.push(VISIBLE);
        qb.push(" AND k.keyword IN (");
        {
            let mut sep = qb.separated(", ");
            for keyword in keywords {
                sep.push_bind(keyword.clone());
            }
        }
        qb.push(")");
        scope.push_filters(&mut qb);
        qb.push(" GROUP BY c.id ORDER BY score DESC, c.id LIMIT ")
            .push_bind(top_k as i64);

        let hits = qb.build_query_as::<ChunkHit>().fetch_all(self.pool()).await?;
        Ok(hits)
    }

    /// Visible chunks matching an FTS5 expression; `score` is the raw bm25
    /// value (lower is better)
    pub async fn fulltext_search_chunks(
        &self,
        table: FtsTable,
        match_expr: &str,
        top_k: usize,
        scope: &SearchScope,
    ) -> Result<Vec<ChunkHit>> {
        if match_expr.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let fts = table.name();
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT ");
        qb.push(HIT_COLUMNS);
        qb.push(format!(
            r#",
            bm25({fts}) AS score
            FROM {fts}
            JOIN chunks c ON c.rowid = {fts}.rowid
            JOIN documents d ON d.id = c.document_id
            WHERE {fts} MATCH "#
        ));
        qb.push_bind(match_expr.to_string());
        qb.push(" AND");
        qb.push(VISIBLE);
        scope.push_filters(&mut qb);
        qb.push(" ORDER BY score LIMIT ").push_bind(top_k as i64);

        let hits = qb.build_query_as::<ChunkHit>().fetch_all(self.pool()).await?;
        Ok(hits)
    }

    /// The subset of `chunk_ids` that is visible within `scope`; `score` is 0
    pub async fn visible_chunks(
        &self,
        chunk_ids: &[String],
        scope: &SearchScope,
    ) -> Result<Vec<ChunkHit>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT ");
        qb.push(HIT_COLUMNS);
        qb.push(
            r#",
            0.0 AS score
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE"#,
        );
        qb.push(VISIBLE);
        qb.push(" AND c.id IN (");
        {
            let mut sep = qb.separated(", ");
            for id in chunk_ids {
                sep.push_bind(id.clone());
            }
        }
        qb.push(")");
        scope.push_filters(&mut qb);

        let hits = qb.build_query_as::<ChunkHit>().fetch_all(self.pool()).await?;
        Ok(hits)
    }
}
