//! Per-document ingestion pipeline.
//!
//! ```text
//! extract ─▶ fingerprint/cache assets ─▶ objects + duplicate flags
//!    ─▶ chunk ─▶ embed (text + visual) ─▶ index ─▶ document completed
//! ```
//!
//! Every stage after the session starts records its failure on the session
//! and the document, then stops. Other documents are unaffected.

mod queue;

pub use queue::*;

use crate::chunk::{chunk_objects, chunk_params, compute_content_hash, ChunkDraft};
use crate::config::{ChunkConfig, Config};
use crate::embed::{EmbeddingInput, MultiVectorEmbedder};
use crate::error::{Error, Result};
use crate::extract::{cache_asset, detect_document_type, ExtractionSource, Extractor, RawObject};
use crate::index::IndexStore;
use crate::meta::{
    ChunkRecord, ChunkSession, Document, DuplicateImage, ExtractedObject, ExtractionSession,
    MetaDb, ProcessingStatus, VectorKind,
};
use crate::phash::{fingerprint_image, DuplicateDetector};
use crate::session::{ChunkSessionManager, ExtractionSessionManager};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One document to ingest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestJob {
    pub document_id: String,
    pub path: PathBuf,
    /// Declared type; inferred from the extension when absent
    pub document_type: Option<String>,
    pub container_id: String,
    pub title: Option<String>,
}

impl IngestJob {
    /// A job for a new document with a fresh id
    pub fn new(path: impl Into<PathBuf>, container_id: impl Into<String>) -> Self {
        Self {
            document_id: Uuid::new_v4().to_string(),
            path: path.into(),
            document_type: None,
            container_id: container_id.into(),
            title: None,
        }
    }

    fn document_type(&self) -> String {
        self.document_type
            .clone()
            .unwrap_or_else(|| detect_document_type(&self.path))
    }
}

/// Outcome of ingesting one document
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub status: ProcessingStatus,
    pub extraction_session_id: Option<String>,
    pub chunk_session_id: Option<String>,
    pub page_count: usize,
    pub objects_extracted: usize,
    pub chunks_created: usize,
    pub embeddings_written: usize,
    /// Vectors that were expected but could not be produced
    pub embeddings_missing: usize,
    /// Advisory near-duplicate image flags raised for this document
    pub duplicate_images: usize,
    pub error: Option<String>,
}

impl IngestReport {
    fn new(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            status: ProcessingStatus::Processing,
            extraction_session_id: None,
            chunk_session_id: None,
            page_count: 0,
            objects_extracted: 0,
            chunks_created: 0,
            embeddings_written: 0,
            embeddings_missing: 0,
            duplicate_images: 0,
            error: None,
        }
    }

    fn failed(mut self, err: &Error) -> Self {
        self.status = ProcessingStatus::Failed;
        self.error = Some(err.to_string());
        self
    }
}

pub struct IngestPipeline {
    db: MetaDb,
    index: Arc<IndexStore>,
    extractor: Arc<dyn Extractor>,
    embedder: Arc<MultiVectorEmbedder>,
    extraction_sessions: ExtractionSessionManager,
    chunk_sessions: ChunkSessionManager,
    detector: DuplicateDetector,
    chunk_config: ChunkConfig,
    model_profile: String,
    assets_dir: PathBuf,
}

impl IngestPipeline {
    pub fn new(
        config: &Config,
        db: MetaDb,
        index: Arc<IndexStore>,
        extractor: Arc<dyn Extractor>,
        embedder: Arc<MultiVectorEmbedder>,
    ) -> Self {
        let max_error_chars = config.extraction.max_error_chars;
        Self {
            extraction_sessions: ExtractionSessionManager::new(db.clone(), max_error_chars),
            chunk_sessions: ChunkSessionManager::new(db.clone(), max_error_chars),
            detector: DuplicateDetector::new(config.dedup.phash_max_distance),
            chunk_config: config.chunk.clone(),
            model_profile: config.extraction.model_profile.clone(),
            assets_dir: config.paths.assets_dir.clone(),
            db,
            index,
            extractor,
            embedder,
        }
    }

    /// Ingest one document end to end.
    ///
    /// Errors before a session exists (unreadable file, a running session
    /// for the document) are returned. Failures inside a session are
    /// recorded and reported with `status == Failed`.
    pub async fn ingest(&self, job: IngestJob) -> Result<IngestReport> {
        let bytes = tokio::fs::read(&job.path)
            .await
            .map_err(|e| Error::NotFound(format!("{}: {}", job.path.display(), e)))?;
        self.register_document(&job, &bytes).await?;

        let mut report = IngestReport::new(&job.document_id);
        let extraction = self
            .extraction_sessions
            .start(&job.document_id, self.extractor.provider(), &self.model_profile)
            .await?;
        report.extraction_session_id = Some(extraction.id.clone());

        let objects = match self.extract_stage(&job, &extraction, &mut report).await {
            Ok(objects) => objects,
            Err(err) => {
                let recorded = self.extraction_sessions.fail(&extraction.id, &err.to_string()).await;
                self.settle_failure(recorded.map(|_| ()), &job.document_id, &err)
                    .await?;
                return Ok(report.failed(&err));
            }
        };

        // Advisory only: a failed lookup never fails the document
        match self.flag_duplicates(&job.document_id, &objects).await {
            Ok(count) => report.duplicate_images = count,
            Err(err) => warn!(document_id = %job.document_id, "Duplicate detection failed: {}", err),
        }

        let chunk_session = match self
            .chunk_sessions
            .start(
                &job.document_id,
                &extraction.id,
                &self.chunk_config.strategy,
                &chunk_params(&self.chunk_config),
            )
            .await
        {
            Ok(session) => session,
            Err(err) => {
                self.db
                    .fail_document(&job.document_id, &err.to_string())
                    .await?;
                return Ok(report.failed(&err));
            }
        };
        report.chunk_session_id = Some(chunk_session.id.clone());

        if let Err(err) = self
            .index_stage(&job, &objects, &chunk_session, &mut report)
            .await
        {
            let recorded = self.chunk_sessions.fail(&chunk_session.id, &err.to_string()).await;
            self.settle_failure(recorded.map(|_| ()), &job.document_id, &err)
                .await?;
            return Ok(report.failed(&err));
        }

        report.status = ProcessingStatus::Completed;
        info!(
            document_id = %job.document_id,
            objects = report.objects_extracted,
            chunks = report.chunks_created,
            embeddings = report.embeddings_written,
            embeddings_missing = report.embeddings_missing,
            duplicate_images = report.duplicate_images,
            "Document ingested"
        );
        Ok(report)
    }

    /// Settle a stage failure. A session that already reached `success`
    /// cannot fail, so the document alone is marked failed.
    async fn settle_failure(&self, recorded: Result<()>, document_id: &str, err: &Error) -> Result<()> {
        match recorded {
            Ok(()) => Ok(()),
            Err(Error::State(reason)) => {
                warn!(document_id = %document_id, "Session already settled: {}", reason);
                self.db.fail_document(document_id, &err.to_string()).await
            }
            Err(other) => Err(other),
        }
    }

    async fn register_document(&self, job: &IngestJob, bytes: &[u8]) -> Result<()> {
        if self.db.has_running_session(&job.document_id).await? {
            return Err(Error::Conflict(format!(
                "document {} is being ingested",
                job.document_id
            )));
        }

        let content_hash = compute_content_hash(bytes);
        let mut doc = match self.db.get_document(&job.document_id).await? {
            Some(existing) => existing,
            None => {
                let mut doc = Document::new(
                    job.container_id.clone(),
                    job.path.display().to_string(),
                    job.document_type(),
                    content_hash.clone(),
                );
                doc.id = job.document_id.clone();
                doc
            }
        };
        doc.container_id = job.container_id.clone();
        doc.uri = job.path.display().to_string();
        doc.document_type = job.document_type();
        doc.content_hash = content_hash;
        if job.title.is_some() {
            doc.title = job.title.clone();
        }
        doc.updated_at = Utc::now().to_rfc3339();
        self.db.upsert_document(&doc).await
    }

    /// Extract, fingerprint and persist the objects of one session
    async fn extract_stage(
        &self,
        job: &IngestJob,
        session: &ExtractionSession,
        report: &mut IngestReport,
    ) -> Result<Vec<ExtractedObject>> {
        let source = ExtractionSource {
            path: job.path.clone(),
            document_type: job.document_type(),
            model_profile: self.model_profile.clone(),
        };
        let content = self.extractor.extract(&source).await?;
        debug!(
            document_id = %job.document_id,
            objects = content.objects.len(),
            pages = content.page_count,
            "Extracted document"
        );

        let mut objects = Vec::with_capacity(content.objects.len());
        for raw in content.objects {
            objects.push(self.persistable(raw, session).await?);
        }
        objects.sort_by_key(|o| (o.page_no, o.sequence_in_page));

        self.db
            .insert_objects(&objects, self.detector.band_count())
            .await?;
        if job.title.is_none() {
            if let Some(title) = content.title {
                self.set_title(&job.document_id, title).await?;
            }
        }
        self.extraction_sessions
            .complete(&session.id, content.page_count)
            .await?;

        report.page_count = content.page_count;
        report.objects_extracted = objects.len();
        Ok(objects)
    }

    /// Bind a raw object to its session, caching and fingerprinting images
    async fn persistable(&self, raw: RawObject, session: &ExtractionSession) -> Result<ExtractedObject> {
        let mut object = ExtractedObject {
            id: Uuid::new_v4().to_string(),
            extraction_session_id: session.id.clone(),
            document_id: session.document_id.clone(),
            object_type: raw.object_type.to_string(),
            page_no: raw.page_no as i64,
            sequence_in_page: raw.sequence_in_page as i64,
            bbox_json: raw.bbox.map(|b| serde_json::to_string(&b)).transpose()?,
            text_content: raw.text,
            structure_json: raw.structure.map(|s| serde_json::to_string(&s)).transpose()?,
            image_width: None,
            image_height: None,
            phash: None,
            asset_path: None,
        };

        if let Some(bytes) = raw.image.filter(|b| !b.is_empty()) {
            let ext = raw.image_ext.as_deref().unwrap_or(".png");
            let path = cache_asset(&self.assets_dir, &bytes, ext).await?;
            object.asset_path = Some(path.display().to_string());

            match fingerprint_image(&bytes) {
                Ok(fp) => {
                    object.image_width = Some(fp.width as i64);
                    object.image_height = Some(fp.height as i64);
                    object.phash = Some(fp.hash as i64);
                }
                Err(err) => warn!(
                    object_id = %object.id,
                    page = object.page_no,
                    "Image could not be decoded, skipping fingerprint: {}",
                    err
                ),
            }
        }
        Ok(object)
    }

    async fn set_title(&self, document_id: &str, title: String) -> Result<()> {
        if let Some(mut doc) = self.db.get_document(document_id).await? {
            if doc.title.is_none() {
                doc.title = Some(title);
                doc.updated_at = Utc::now().to_rfc3339();
                self.db.upsert_document(&doc).await?;
            }
        }
        Ok(())
    }

    /// Flag near-duplicate images within the document and against the index
    async fn flag_duplicates(&self, document_id: &str, objects: &[ExtractedObject]) -> Result<usize> {
        let items: Vec<(String, u64)> = objects
            .iter()
            .filter_map(|o| o.fingerprint().map(|hash| (o.id.clone(), hash)))
            .collect();
        if items.is_empty() {
            return Ok(0);
        }

        let mut pairs = self.detector.find_duplicates(&items);
        pairs.extend(self.detector.find_in_index(&self.db, document_id, &items).await?);

        let flags: Vec<DuplicateImage> = pairs.into_iter().map(DuplicateImage::from).collect();
        self.db.insert_duplicates(&flags).await?;
        if !flags.is_empty() {
            info!(document_id = %document_id, count = flags.len(), "Flagged near-duplicate images");
        }
        Ok(flags.len())
    }

    /// Chunk, embed and index, then publish the session
    async fn index_stage(
        &self,
        job: &IngestJob,
        objects: &[ExtractedObject],
        session: &ChunkSession,
        report: &mut IngestReport,
    ) -> Result<()> {
        let drafts = chunk_objects(objects, &self.chunk_config)?;
        let chunks: Vec<ChunkRecord> = drafts
            .into_iter()
            .map(|draft| chunk_record(draft, session))
            .collect::<Result<_>>()?;
        self.db.insert_chunks(&chunks).await?;
        report.chunks_created = chunks.len();

        let inputs = chunks
            .iter()
            .map(EmbeddingInput::from_chunk)
            .collect::<Result<Vec<_>>>()?;
        let results = self.embedder.embed(&inputs).await?;
        report.embeddings_missing = results.iter().map(|r| r.missing.len()).sum();
        if report.embeddings_missing > 0 {
            warn!(
                document_id = %job.document_id,
                missing = report.embeddings_missing,
                "Some embeddings could not be produced"
            );
        }

        let mut models = HashMap::new();
        for kind in [VectorKind::Text, VectorKind::Visual] {
            if let Some(model) = self.embedder.model_for(kind) {
                models.insert(kind, model.to_string());
            }
        }
        report.embeddings_written = self
            .index
            .index_embeddings(
                &job.container_id,
                &chunks,
                &results,
                &models,
                self.embedder.registry(),
            )
            .await?;

        self.chunk_sessions.complete(&session.id, chunks.len()).await?;
        self.db.complete_document(&job.document_id, &session.id).await
    }
}

fn chunk_record(draft: ChunkDraft, session: &ChunkSession) -> Result<ChunkRecord> {
    Ok(ChunkRecord {
        id: Uuid::new_v4().to_string(),
        chunk_session_id: session.id.clone(),
        document_id: session.document_id.clone(),
        source_object_id: draft.source_object_id,
        modality: draft.modality.to_string(),
        content_text: draft.text,
        content_hash: draft.content_hash,
        token_count: draft.token_count as i64,
        char_count: draft.char_count as i64,
        chunk_index: draft.index as i64,
        page_no: draft.page_no.map(i64::from),
        keywords_json: Some(serde_json::to_string(&draft.keywords)?),
        asset_path: draft.asset_path,
        created_at: Utc::now().to_rfc3339(),
    })
}

/// Collect ingestible files under `path` (a file, or a directory walked
/// one level deep), sorted for a stable order
pub fn collect_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err(Error::NotFound(path.display().to_string()));
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter(|p| {
            !p.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with('.'))
                .unwrap_or(true)
        })
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::embed::tests::FakeEmbedder;
    use crate::embed::Embedder;
    use crate::extract::{ExtractedContent, LocalExtractor, ObjectStructure};
    use crate::meta::tests::setup_test_db;
    use crate::meta::{ObjectType, SearchScope};
    use crate::index::SearchIndex;
    use crate::models::DimensionRegistry;
    use crate::phash::tests::gradient_png;
    use crate::store::InMemoryVectorStore;
    use async_trait::async_trait;
    use tempfile::TempDir;

    pub(crate) struct Harness {
        pub pipeline: IngestPipeline,
        pub db: MetaDb,
        pub index: Arc<IndexStore>,
        pub tmp: TempDir,
    }

    pub(crate) async fn harness(extractor: Arc<dyn Extractor>, text: FakeEmbedder) -> Harness {
        let (db, tmp) = setup_test_db().await;
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));

        let mut registry = DimensionRegistry::builtin();
        registry.register(text.model.clone(), text.dimension);
        registry.register("fake-visual", 4);
        let text_dim = text.dimension;
        let text: Arc<dyn Embedder> = Arc::new(text);
        let visual: Arc<dyn Embedder> = Arc::new(FakeEmbedder::new("fake-visual", 4).with_images());
        let embedder = Arc::new(MultiVectorEmbedder::new(text, Some(visual), registry, 8));

        let index = Arc::new(IndexStore::new(
            db.clone(),
            Arc::new(InMemoryVectorStore::new("t_text", text_dim)),
            Some(Arc::new(InMemoryVectorStore::new("t_visual", 4))),
        ));
        let pipeline = IngestPipeline::new(&config, db.clone(), index.clone(), extractor, embedder);
        Harness {
            pipeline,
            db,
            index,
            tmp,
        }
    }

    fn write(tmp: &TempDir, name: &str, content: &[u8]) -> PathBuf {
        let path = tmp.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_ingest_markdown_with_image() {
        let h = harness(Arc::new(LocalExtractor::new()), FakeEmbedder::new("fake", 8)).await;
        write(&h.tmp, "diagram.png", &gradient_png(32, 32));
        let doc = write(
            &h.tmp,
            "notes.md",
            "# Encoders\n\nBERT reads text in both directions.\n\n![Encoder diagram](diagram.png)\n\x0cGPT predicts the next token.\n"
                .as_bytes(),
        );

        let report = h
            .pipeline
            .ingest(IngestJob::new(&doc, "papers"))
            .await
            .unwrap();
        assert_eq!(report.status, ProcessingStatus::Completed);
        assert_eq!(report.page_count, 2);
        assert_eq!(report.objects_extracted, 4);
        assert_eq!(report.embeddings_missing, 0);
        assert_eq!(report.duplicate_images, 0);
        // Every chunk has a text vector, the image chunk also a visual one
        assert_eq!(report.embeddings_written, report.chunks_created + 1);

        let stored = h.db.get_document(&report.document_id).await.unwrap().unwrap();
        assert_eq!(stored.processing_status, "completed");
        assert_eq!(stored.title.as_deref(), Some("Encoders"));

        let hits = h
            .index
            .keyword_search(&["gpt".to_string()], 5, &SearchScope::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].metadata.page_no, Some(2));
    }

    struct BrokenExtractor;

    #[async_trait]
    impl Extractor for BrokenExtractor {
        fn provider(&self) -> &str {
            "broken"
        }

        async fn extract(&self, _source: &ExtractionSource) -> Result<ExtractedContent> {
            Err(Error::Extraction("layout model crashed".to_string()))
        }
    }

    #[tokio::test]
    async fn test_extraction_failure_is_recorded() {
        let h = harness(Arc::new(BrokenExtractor), FakeEmbedder::new("fake", 8)).await;
        let doc = write(&h.tmp, "a.txt", b"hello");

        let report = h.pipeline.ingest(IngestJob::new(&doc, "papers")).await.unwrap();
        assert_eq!(report.status, ProcessingStatus::Failed);
        assert!(report.error.as_deref().unwrap().contains("layout model crashed"));

        let session = h
            .db
            .get_extraction_session(report.extraction_session_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.status, "failed");
        let stored = h.db.get_document(&report.document_id).await.unwrap().unwrap();
        assert_eq!(stored.processing_status, "failed");
        assert!(stored.last_error.is_some());
    }

    #[tokio::test]
    async fn test_failed_embeddings_are_counted_not_fatal() {
        let h = harness(
            Arc::new(LocalExtractor::new()),
            FakeEmbedder::new("fake", 8).poisoned("POISON"),
        )
        .await;
        let doc = write(
            &h.tmp,
            "a.txt",
            b"First page about attention.\n\x0cSecond page mentions POISON here.\n",
        );

        let mut job = IngestJob::new(&doc, "papers");
        job.title = Some("Attention".to_string());
        let report = h.pipeline.ingest(job).await.unwrap();
        assert_eq!(report.status, ProcessingStatus::Completed);
        assert!(report.embeddings_missing >= 1);
        assert!(report.embeddings_written >= 1);
    }

    #[tokio::test]
    async fn test_reingest_publishes_latest_session() {
        let h = harness(Arc::new(LocalExtractor::new()), FakeEmbedder::new("fake", 8)).await;
        let path = write(&h.tmp, "a.txt", b"graphene anode coating");
        let mut job = IngestJob::new(&path, "patents");

        let first = h.pipeline.ingest(job.clone()).await.unwrap();
        std::fs::write(&path, b"silicon anode coating").unwrap();
        job.document_id = first.document_id.clone();
        let second = h.pipeline.ingest(job).await.unwrap();
        assert_eq!(second.status, ProcessingStatus::Completed);

        let hits = h
            .index
            .keyword_search(&["graphene".to_string()], 5, &SearchScope::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
        let hits = h
            .index
            .keyword_search(&["silicon".to_string()], 5, &SearchScope::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    struct ImagesOnly(Vec<u8>);

    #[async_trait]
    impl Extractor for ImagesOnly {
        fn provider(&self) -> &str {
            "images"
        }

        async fn extract(&self, _source: &ExtractionSource) -> Result<ExtractedContent> {
            let image = |page: u32| RawObject {
                object_type: ObjectType::Image,
                page_no: page,
                sequence_in_page: 0,
                bbox: None,
                text: Some(format!("figure {}", page)),
                structure: Some(ObjectStructure::Image {
                    caption: Some(format!("figure {}", page)),
                    format: Some("png".to_string()),
                }),
                image: Some(self.0.clone()),
                image_ext: Some(".png".to_string()),
            };
            Ok(ExtractedContent {
                title: None,
                page_count: 2,
                objects: vec![image(1), image(2)],
            })
        }
    }

    #[tokio::test]
    async fn test_duplicate_images_within_document() {
        let h = harness(
            Arc::new(ImagesOnly(gradient_png(16, 16))),
            FakeEmbedder::new("fake", 8),
        )
        .await;
        let path = write(&h.tmp, "scan.bin", b"raw scan");

        let report = h.pipeline.ingest(IngestJob::new(&path, "patents")).await.unwrap();
        assert_eq!(report.duplicate_images, 1);
        let flags = h.db.list_duplicates(&report.document_id).await.unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].distance, 0);
    }

    /// Delegates to the local extractor after moving every document out of
    /// `processing`, so the final document transition is rejected
    struct SettlesDocument {
        db: Arc<std::sync::OnceLock<MetaDb>>,
        inner: LocalExtractor,
    }

    #[async_trait]
    impl Extractor for SettlesDocument {
        fn provider(&self) -> &str {
            "settles"
        }

        async fn extract(&self, source: &ExtractionSource) -> Result<ExtractedContent> {
            if let Some(db) = self.db.get() {
                sqlx::query("UPDATE documents SET processing_status = 'completed'")
                    .execute(db.pool())
                    .await?;
            }
            self.inner.extract(source).await
        }
    }

    #[tokio::test]
    async fn test_failure_after_session_success_fails_document() {
        let slot = Arc::new(std::sync::OnceLock::new());
        let extractor = SettlesDocument {
            db: slot.clone(),
            inner: LocalExtractor::new(),
        };
        let h = harness(Arc::new(extractor), FakeEmbedder::new("fake", 8)).await;
        let _ = slot.set(h.db.clone());
        let doc = write(&h.tmp, "a.txt", b"Attention weighs every token.");

        let report = h.pipeline.ingest(IngestJob::new(&doc, "papers")).await.unwrap();
        assert_eq!(report.status, ProcessingStatus::Failed);
        assert!(report.error.as_deref().unwrap().contains("not processing"));

        let session = h
            .db
            .get_chunk_session(report.chunk_session_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.status, "success");
        let stored = h.db.get_document(&report.document_id).await.unwrap().unwrap();
        assert_eq!(stored.processing_status, "failed");
        assert!(stored.last_error.unwrap().contains("not processing"));
    }

    #[tokio::test]
    async fn test_conflicting_reingest_leaves_document_untouched() {
        let h = harness(Arc::new(LocalExtractor::new()), FakeEmbedder::new("fake", 8)).await;
        let first_path = write(&h.tmp, "a.txt", b"graphene anode coating");
        let first = h
            .pipeline
            .ingest(IngestJob::new(&first_path, "patents"))
            .await
            .unwrap();
        let running = ExtractionSession::new(
            first.document_id.clone(),
            "local".to_string(),
            "default".to_string(),
        );
        h.db.insert_extraction_session(&running).await.unwrap();

        let other_path = write(&h.tmp, "b.txt", b"silicon anode coating");
        let mut job = IngestJob::new(&other_path, "other");
        job.document_id = first.document_id.clone();
        job.title = Some("Replacement".to_string());
        let result = h.pipeline.ingest(job).await;
        assert!(matches!(result, Err(Error::Conflict(_))));

        let stored = h.db.get_document(&first.document_id).await.unwrap().unwrap();
        assert_eq!(stored.uri, first_path.display().to_string());
        assert_eq!(stored.container_id, "patents");
        assert!(stored.title.is_none());
    }

    #[test]
    fn test_collect_files() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.md"), "b").unwrap();
        std::fs::write(tmp.path().join("a.txt"), "a").unwrap();
        std::fs::write(tmp.path().join(".hidden"), "h").unwrap();
        std::fs::create_dir(tmp.path().join("nested")).unwrap();

        let files = collect_files(tmp.path()).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.txt", "b.md"]);
        assert!(collect_files(&tmp.path().join("missing")).is_err());
    }
}
