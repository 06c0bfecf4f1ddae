//! Extracted objects, chunks, embedding records and image fingerprints

use super::{refresh_search_index, MetaDb};
use crate::error::{Error, Result};
use crate::models::DimensionRegistry;
use crate::phash::split_bands;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use std::collections::BTreeSet;
use std::str::FromStr;
use uuid::Uuid;

/// Kind of object produced by extraction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ObjectType {
    Text,
    Table,
    Image,
    Figure,
}

impl ObjectType {
    pub fn is_visual(&self) -> bool {
        matches!(self, ObjectType::Image | ObjectType::Figure)
    }
}

impl std::fmt::Display for ObjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ObjectType::Text => write!(f, "TEXT"),
            ObjectType::Table => write!(f, "TABLE"),
            ObjectType::Image => write!(f, "IMAGE"),
            ObjectType::Figure => write!(f, "FIGURE"),
        }
    }
}

impl FromStr for ObjectType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "TEXT" => Ok(ObjectType::Text),
            "TABLE" => Ok(ObjectType::Table),
            "IMAGE" => Ok(ObjectType::Image),
            "FIGURE" => Ok(ObjectType::Figure),
            _ => Err(Error::Other(format!("Unknown object type: {}", s))),
        }
    }
}

/// Chunk modality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Table,
    Image,
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Modality::Text => write!(f, "text"),
            Modality::Table => write!(f, "table"),
            Modality::Image => write!(f, "image"),
        }
    }
}

impl FromStr for Modality {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(Modality::Text),
            "table" => Ok(Modality::Table),
            "image" => Ok(Modality::Image),
            _ => Err(Error::Other(format!("Unknown modality: {}", s))),
        }
    }
}

/// Vector space an embedding lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorKind {
    Text,
    Visual,
}

impl std::fmt::Display for VectorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VectorKind::Text => write!(f, "text"),
            VectorKind::Visual => write!(f, "visual"),
        }
    }
}

impl FromStr for VectorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" => Ok(VectorKind::Text),
            "visual" => Ok(VectorKind::Visual),
            _ => Err(Error::Other(format!("Unknown vector kind: {}", s))),
        }
    }
}

/// Stable Qdrant point id for a chunk's vector of one kind
pub fn point_id_for(chunk_id: &str, kind: VectorKind) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}:{}", chunk_id, kind).as_bytes(),
    )
    .to_string()
}

/// An object produced by extraction. Immutable once written.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ExtractedObject {
    pub id: String,
    pub extraction_session_id: String,
    pub document_id: String,
    pub object_type: String,
    pub page_no: i64,
    pub sequence_in_page: i64,
    pub bbox_json: Option<String>,
    pub text_content: Option<String>,
    pub structure_json: Option<String>,
    pub image_width: Option<i64>,
    pub image_height: Option<i64>,
    pub phash: Option<i64>,
    pub asset_path: Option<String>,
}

impl ExtractedObject {
    pub fn object_type(&self) -> Result<ObjectType> {
        self.object_type.parse()
    }

    /// The perceptual hash as the unsigned value it was computed as
    pub fn fingerprint(&self) -> Option<u64> {
        self.phash.map(|h| h as u64)
    }
}

/// A persisted chunk
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: String,
    pub chunk_session_id: String,
    pub document_id: String,
    pub source_object_id: Option<String>,
    pub modality: String,
    pub content_text: String,
    pub content_hash: String,
    pub token_count: i64,
    pub char_count: i64,
    pub chunk_index: i64,
    pub page_no: Option<i64>,
    pub keywords_json: Option<String>,
    pub asset_path: Option<String>,
    pub created_at: String,
}

impl ChunkRecord {
    pub fn modality(&self) -> Result<Modality> {
        self.modality.parse()
    }

    pub fn keywords(&self) -> Vec<String> {
        self.keywords_json
            .as_ref()
            .and_then(|j| serde_json::from_str(j).ok())
            .unwrap_or_default()
    }
}

/// Record of a vector stored in Qdrant
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub id: String,
    pub chunk_id: String,
    pub model_name: String,
    pub dimension: i64,
    pub modality: String,
    pub vector_kind: String,
    pub point_id: String,
    pub created_at: String,
}

impl EmbeddingRecord {
    pub fn new(
        chunk_id: &str,
        model_name: &str,
        dimension: usize,
        modality: Modality,
        kind: VectorKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            chunk_id: chunk_id.to_string(),
            model_name: model_name.to_string(),
            dimension: dimension as i64,
            modality: modality.to_string(),
            vector_kind: kind.to_string(),
            point_id: point_id_for(chunk_id, kind),
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// A stored image fingerprint
#[derive(Debug, Clone, FromRow)]
pub struct FingerprintRow {
    pub object_id: String,
    pub document_id: String,
    pub phash: i64,
}

/// Advisory near-duplicate flag
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DuplicateImage {
    pub object_id: String,
    pub duplicate_of: String,
    pub distance: i64,
    pub created_at: String,
}

impl DuplicateImage {
    pub fn new(object_id: String, duplicate_of: String, distance: u32) -> Self {
        Self {
            object_id,
            duplicate_of,
            distance: distance as i64,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

impl MetaDb {
    // ===== Extracted Objects =====

    /// Write all objects of one extraction session, plus the band rows of
    /// every fingerprinted object, in a single transaction
    pub async fn insert_objects(&self, objects: &[ExtractedObject], band_count: u32) -> Result<()> {
        let mut tx = self.pool().begin().await?;

        for obj in objects {
            sqlx::query(
                r#"
                INSERT INTO extracted_objects (id, extraction_session_id, document_id, object_type,
                    page_no, sequence_in_page, bbox_json, text_content, structure_json,
                    image_width, image_height, phash, asset_path)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&obj.id)
            .bind(&obj.extraction_session_id)
            .bind(&obj.document_id)
            .bind(&obj.object_type)
            .bind(obj.page_no)
            .bind(obj.sequence_in_page)
            .bind(&obj.bbox_json)
            .bind(&obj.text_content)
            .bind(&obj.structure_json)
            .bind(obj.image_width)
            .bind(obj.image_height)
            .bind(obj.phash)
            .bind(&obj.asset_path)
            .execute(&mut *tx)
            .await?;

            if let Some(hash) = obj.fingerprint() {
                for (band_no, band_value) in split_bands(hash, band_count).into_iter().enumerate() {
                    sqlx::query(
                        r#"
                        INSERT INTO phash_bands (object_id, document_id, band_count, band_no, band_value)
                        VALUES (?, ?, ?, ?, ?)
                        "#,
                    )
                    .bind(&obj.id)
                    .bind(&obj.document_id)
                    .bind(band_count as i64)
                    .bind(band_no as i64)
                    .bind(band_value as i64)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Objects of an extraction session in reading order
    pub async fn list_objects(&self, extraction_session_id: &str) -> Result<Vec<ExtractedObject>> {
        let objects = sqlx::query_as::<_, ExtractedObject>(
            r#"
            SELECT * FROM extracted_objects
            WHERE extraction_session_id = ?
            ORDER BY page_no, sequence_in_page
            "#,
        )
        .bind(extraction_session_id)
        .fetch_all(self.pool())
        .await?;
        Ok(objects)
    }

    /// Fingerprints of live documents other than `exclude_document` that share
    /// at least one band with `hash`
    pub async fn find_band_matches(
        &self,
        hash: u64,
        band_count: u32,
        exclude_document: &str,
    ) -> Result<Vec<FingerprintRow>> {
        let bands = split_bands(hash, band_count);

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            r#"
            SELECT DISTINCT o.id AS object_id, o.document_id AS document_id, o.phash AS phash
            FROM phash_bands b
            JOIN extracted_objects o ON o.id = b.object_id
            JOIN documents d ON d.id = o.document_id
            WHERE d.deleted_at IS NULL AND o.phash IS NOT NULL
            "#,
        );
        qb.push(" AND b.band_count = ").push_bind(band_count as i64);
        qb.push(" AND o.document_id != ").push_bind(exclude_document);
        qb.push(" AND (");
        for (band_no, band_value) in bands.iter().enumerate() {
            if band_no > 0 {
                qb.push(" OR ");
            }
            qb.push("(b.band_no = ")
                .push_bind(band_no as i64)
                .push(" AND b.band_value = ")
                .push_bind(*band_value as i64)
                .push(")");
        }
        qb.push(")");

        let rows = qb
            .build_query_as::<FingerprintRow>()
            .fetch_all(self.pool())
            .await?;
        Ok(rows)
    }

    /// Record duplicate flags; existing pairs are left as they are
    pub async fn insert_duplicates(&self, duplicates: &[DuplicateImage]) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        for dup in duplicates {
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO duplicate_images (object_id, duplicate_of, distance, created_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&dup.object_id)
            .bind(&dup.duplicate_of)
            .bind(dup.distance)
            .bind(&dup.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Duplicate flags raised for a document's images
    pub async fn list_duplicates(&self, document_id: &str) -> Result<Vec<DuplicateImage>> {
        let dups = sqlx::query_as::<_, DuplicateImage>(
            r#"
            SELECT di.* FROM duplicate_images di
            JOIN extracted_objects o ON o.id = di.object_id
            WHERE o.document_id = ?
            ORDER BY di.distance, di.object_id
            "#,
        )
        .bind(document_id)
        .fetch_all(self.pool())
        .await?;
        Ok(dups)
    }

    // ===== Chunks =====

    /// Write the chunks of one session with their keyword rows, refreshing
    /// the document's search record in the same transaction
    pub async fn insert_chunks(&self, chunks: &[ChunkRecord]) -> Result<()> {
        let Some(first) = chunks.first() else {
            return Ok(());
        };

        let mut tx = self.pool().begin().await?;
        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, chunk_session_id, document_id, source_object_id, modality,
                    content_text, content_hash, token_count, char_count, chunk_index, page_no,
                    keywords_json, asset_path, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.chunk_session_id)
            .bind(&chunk.document_id)
            .bind(&chunk.source_object_id)
            .bind(&chunk.modality)
            .bind(&chunk.content_text)
            .bind(&chunk.content_hash)
            .bind(chunk.token_count)
            .bind(chunk.char_count)
            .bind(chunk.chunk_index)
            .bind(chunk.page_no)
            .bind(&chunk.keywords_json)
            .bind(&chunk.asset_path)
            .bind(&chunk.created_at)
            .execute(&mut *tx)
            .await?;

            for keyword in chunk.keywords() {
                sqlx::query("INSERT OR IGNORE INTO chunk_keywords (chunk_id, keyword) VALUES (?, ?)")
                    .bind(&chunk.id)
                    .bind(&keyword)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        refresh_search_index(&mut tx, &first.document_id, &first.chunk_session_id).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Chunks of a session by index
    pub async fn list_chunks(&self, chunk_session_id: &str) -> Result<Vec<ChunkRecord>> {
        let chunks = sqlx::query_as::<_, ChunkRecord>(
            "SELECT * FROM chunks WHERE chunk_session_id = ? ORDER BY chunk_index",
        )
        .bind(chunk_session_id)
        .fetch_all(self.pool())
        .await?;
        Ok(chunks)
    }

    pub async fn get_chunk(&self, id: &str) -> Result<Option<ChunkRecord>> {
        let chunk = sqlx::query_as::<_, ChunkRecord>("SELECT * FROM chunks WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(chunk)
    }

    // ===== Embeddings =====

    /// Write embedding records after checking every dimension against the
    /// registry. A mismatch rejects the whole batch before anything is written.
    pub async fn insert_embeddings(
        &self,
        records: &[EmbeddingRecord],
        dims: &DimensionRegistry,
    ) -> Result<()> {
        for record in records {
            dims.validate(&record.model_name, record.dimension as usize)?;
        }

        let mut tx = self.pool().begin().await?;
        let mut touched: BTreeSet<(String, String)> = BTreeSet::new();

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO embeddings (id, chunk_id, model_name, dimension, modality, vector_kind,
                    point_id, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(chunk_id, vector_kind) DO UPDATE SET
                    model_name = excluded.model_name,
                    dimension = excluded.dimension,
                    point_id = excluded.point_id,
                    created_at = excluded.created_at
                "#,
            )
            .bind(&record.id)
            .bind(&record.chunk_id)
            .bind(&record.model_name)
            .bind(record.dimension)
            .bind(&record.modality)
            .bind(&record.vector_kind)
            .bind(&record.point_id)
            .bind(&record.created_at)
            .execute(&mut *tx)
            .await?;

            let owner: Option<(String, String)> = sqlx::query_as(
                "SELECT document_id, chunk_session_id FROM chunks WHERE id = ?",
            )
            .bind(&record.chunk_id)
            .fetch_optional(&mut *tx)
            .await?;
            if let Some(owner) = owner {
                touched.insert(owner);
            }
        }

        for (document_id, chunk_session_id) in &touched {
            refresh_search_index(&mut tx, document_id, chunk_session_id).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Embedding records of a chunk
    pub async fn list_embeddings(&self, chunk_id: &str) -> Result<Vec<EmbeddingRecord>> {
        let rows = sqlx::query_as::<_, EmbeddingRecord>(
            "SELECT * FROM embeddings WHERE chunk_id = ? ORDER BY vector_kind",
        )
        .bind(chunk_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }
}
