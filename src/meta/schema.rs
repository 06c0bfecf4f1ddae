//! SQLite schema definition

/// SQL schema for the metadata database
pub const SCHEMA_SQL: &str = r#"
-- Documents: one row per ingested document, soft-deleted only
CREATE TABLE IF NOT EXISTS documents (
    id TEXT PRIMARY KEY,
    container_id TEXT NOT NULL,
    uri TEXT NOT NULL,
    title TEXT,
    document_type TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    processing_status TEXT NOT NULL DEFAULT 'pending',
    last_error TEXT,
    active_chunk_session_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);

-- Extraction sessions: one extraction run per document
CREATE TABLE IF NOT EXISTS extraction_sessions (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id),
    provider TEXT NOT NULL,
    model_profile TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    page_count INTEGER,
    error_message TEXT
);

-- Extracted objects: written once per extraction session
CREATE TABLE IF NOT EXISTS extracted_objects (
    id TEXT PRIMARY KEY,
    extraction_session_id TEXT NOT NULL REFERENCES extraction_sessions(id),
    document_id TEXT NOT NULL REFERENCES documents(id),
    object_type TEXT NOT NULL,
    page_no INTEGER NOT NULL,
    sequence_in_page INTEGER NOT NULL,
    bbox_json TEXT,
    text_content TEXT,
    structure_json TEXT,
    image_width INTEGER,
    image_height INTEGER,
    phash INTEGER,
    asset_path TEXT,
    UNIQUE(extraction_session_id, page_no, sequence_in_page)
);

-- Chunk sessions: one chunking run per successful extraction
CREATE TABLE IF NOT EXISTS chunk_sessions (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL REFERENCES documents(id),
    extraction_session_id TEXT NOT NULL REFERENCES extraction_sessions(id),
    strategy_name TEXT NOT NULL,
    params_json TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    chunk_count INTEGER,
    error_message TEXT
);

-- Chunks: retrievable units
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    chunk_session_id TEXT NOT NULL REFERENCES chunk_sessions(id),
    document_id TEXT NOT NULL REFERENCES documents(id),
    source_object_id TEXT REFERENCES extracted_objects(id),
    modality TEXT NOT NULL,
    content_text TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    token_count INTEGER NOT NULL,
    char_count INTEGER NOT NULL,
    chunk_index INTEGER NOT NULL,
    page_no INTEGER,
    keywords_json TEXT,
    asset_path TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(chunk_session_id, chunk_index)
);

-- Normalized keywords per chunk for overlap search
CREATE TABLE IF NOT EXISTS chunk_keywords (
    chunk_id TEXT NOT NULL REFERENCES chunks(id),
    keyword TEXT NOT NULL,
    PRIMARY KEY(chunk_id, keyword)
);

-- Embeddings: one row per (chunk, vector kind); vectors live in Qdrant
CREATE TABLE IF NOT EXISTS embeddings (
    id TEXT PRIMARY KEY,
    chunk_id TEXT NOT NULL REFERENCES chunks(id),
    model_name TEXT NOT NULL,
    dimension INTEGER NOT NULL,
    modality TEXT NOT NULL,
    vector_kind TEXT NOT NULL,
    point_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE(chunk_id, vector_kind)
);

-- Perceptual hash bands for bucketed near-duplicate lookup
CREATE TABLE IF NOT EXISTS phash_bands (
    object_id TEXT NOT NULL REFERENCES extracted_objects(id),
    document_id TEXT NOT NULL,
    band_count INTEGER NOT NULL,
    band_no INTEGER NOT NULL,
    band_value INTEGER NOT NULL,
    PRIMARY KEY(object_id, band_count, band_no)
);

-- Advisory duplicate image flags
CREATE TABLE IF NOT EXISTS duplicate_images (
    object_id TEXT NOT NULL REFERENCES extracted_objects(id),
    duplicate_of TEXT NOT NULL REFERENCES extracted_objects(id),
    distance INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY(object_id, duplicate_of)
);

-- Materialized per-document search record
CREATE TABLE IF NOT EXISTS search_index (
    document_id TEXT PRIMARY KEY REFERENCES documents(id),
    container_id TEXT NOT NULL,
    title TEXT,
    keywords_text TEXT NOT NULL DEFAULT '',
    chunk_count INTEGER NOT NULL DEFAULT 0,
    text_embeddings INTEGER NOT NULL DEFAULT 0,
    visual_embeddings INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

-- Full-text vectors over chunk content
CREATE VIRTUAL TABLE IF NOT EXISTS chunk_fts_primary USING fts5(
    content_text,
    content='chunks',
    tokenize='porter unicode61 remove_diacritics 2'
);

CREATE VIRTUAL TABLE IF NOT EXISTS chunk_fts_fallback USING fts5(
    content_text,
    content='chunks',
    tokenize='trigram'
);

CREATE TRIGGER IF NOT EXISTS chunks_fts_insert AFTER INSERT ON chunks BEGIN
    INSERT INTO chunk_fts_primary(rowid, content_text) VALUES (new.rowid, new.content_text);
    INSERT INTO chunk_fts_fallback(rowid, content_text) VALUES (new.rowid, new.content_text);
END;

CREATE TRIGGER IF NOT EXISTS chunks_fts_delete AFTER DELETE ON chunks BEGIN
    INSERT INTO chunk_fts_primary(chunk_fts_primary, rowid, content_text)
        VALUES ('delete', old.rowid, old.content_text);
    INSERT INTO chunk_fts_fallback(chunk_fts_fallback, rowid, content_text)
        VALUES ('delete', old.rowid, old.content_text);
END;

-- At most one running session per document
CREATE UNIQUE INDEX IF NOT EXISTS idx_extraction_running
    ON extraction_sessions(document_id) WHERE status = 'running';
CREATE UNIQUE INDEX IF NOT EXISTS idx_chunk_session_running
    ON chunk_sessions(document_id) WHERE status = 'running';

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_documents_container ON documents(container_id);
CREATE INDEX IF NOT EXISTS idx_objects_session ON extracted_objects(extraction_session_id);
CREATE INDEX IF NOT EXISTS idx_objects_document ON extracted_objects(document_id);
CREATE INDEX IF NOT EXISTS idx_chunks_session ON chunks(chunk_session_id);
CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);
CREATE INDEX IF NOT EXISTS idx_keywords_keyword ON chunk_keywords(keyword);
CREATE INDEX IF NOT EXISTS idx_embeddings_point ON embeddings(point_id);
CREATE INDEX IF NOT EXISTS idx_phash_bands_lookup ON phash_bands(band_count, band_no, band_value);
"#;

/// Tables dropped by `docfuse db reset`, children first.
pub const RESET_SQL: &str = r#"
DROP TRIGGER IF EXISTS chunks_fts_insert;
DROP TRIGGER IF EXISTS chunks_fts_delete;
DROP TABLE IF EXISTS chunk_fts_primary;
DROP TABLE IF EXISTS chunk_fts_fallback;
DROP TABLE IF EXISTS search_index;
DROP TABLE IF EXISTS duplicate_images;
DROP TABLE IF EXISTS phash_bands;
DROP TABLE IF EXISTS embeddings;
DROP TABLE IF EXISTS chunk_keywords;
DROP TABLE IF EXISTS chunks;
DROP TABLE IF EXISTS chunk_sessions;
DROP TABLE IF EXISTS extracted_objects;
DROP TABLE IF EXISTS extraction_sessions;
DROP TABLE IF EXISTS documents;
"#;
