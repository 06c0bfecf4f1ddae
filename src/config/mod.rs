//! Configuration management for docfuse
//!
//! Handles loading, saving, and validating configuration from TOML files.

mod defaults;

pub use defaults::*;

use crate::error::{Error, Result};
use crate::models::{embedding_dimension_for_model, embedding_model_capabilities};
use crate::screen::ScreeningDefaults;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Qdrant connection URL
    #[serde(default = "default_qdrant_url")]
    pub qdrant_url: String,

    /// Prefix for the per-vector-kind Qdrant collections
    #[serde(default = "default_collection_prefix")]
    pub collection_prefix: String,

    /// Text embedding model configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Cross-modal (visual) embedding model configuration
    #[serde(default)]
    pub visual_embedding: VisualEmbeddingConfig,

    /// Extraction provider configuration
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Chunking configuration
    #[serde(default)]
    pub chunk: ChunkConfig,

    /// Near-duplicate image detection
    #[serde(default)]
    pub dedup: DedupConfig,

    /// Ingestion worker pool
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Retrieval fusion configuration
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Reranker configuration
    #[serde(default)]
    pub reranker: RerankerConfig,

    /// Paths configuration (internal, not user-editable)
    #[serde(skip)]
    pub paths: PathsConfig,
}

/// Text embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider: "http" or "local"
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Model name/identifier
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension (must match model)
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Embedding backend URL
    #[serde(default = "default_embedding_backend_url")]
    pub backend_url: String,

    /// Batch size for embedding
    #[serde(default = "default_embedding_batch_size")]
    pub batch_size: usize,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout_secs")]
    pub timeout_secs: u64,
}

/// Cross-modal embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualEmbeddingConfig {
    /// Produce visual embeddings for image chunks
    #[serde(default = "default_visual_enabled")]
    pub enabled: bool,

    /// Model name/identifier (image and caption share one space)
    #[serde(default = "default_visual_model")]
    pub model: String,

    /// Embedding dimension (must match model)
    #[serde(default = "default_visual_dimension")]
    pub dimension: usize,

    /// Backend URL (defaults to the text embedding backend)
    #[serde(default)]
    pub backend_url: Option<String>,
}

/// Extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Provider: "local" or "http"
    #[serde(default = "default_extraction_provider")]
    pub provider: String,

    /// Model profile passed to the provider and recorded on the session
    #[serde(default = "default_model_profile")]
    pub model_profile: String,

    /// Extraction sidecar URL (http provider only)
    #[serde(default = "default_extraction_backend_url")]
    pub backend_url: String,

    /// Request timeout in seconds (http provider only)
    #[serde(default = "default_extraction_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum characters of an error message stored on a session
    #[serde(default = "default_max_error_chars")]
    pub max_error_chars: usize,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkConfig {
    /// Strategy name recorded on the chunk session
    #[serde(default = "default_chunk_strategy")]
    pub strategy: String,

    /// Maximum characters per chunk
    #[serde(default = "default_chunk_max_chars")]
    pub max_chars: usize,

    /// Overlap characters between chunks
    #[serde(default = "default_chunk_overlap")]
    pub overlap_chars: usize,

    /// Minimum chunk size (don't create tiny chunks)
    #[serde(default = "default_chunk_min_chars")]
    pub min_chars: usize,

    /// Keywords stored per chunk for keyword search
    #[serde(default = "default_chunk_max_keywords")]
    pub max_keywords: usize,
}

/// Perceptual-hash duplicate detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Maximum Hamming distance for two images to be flagged as duplicates
    #[serde(default = "default_phash_max_distance")]
    pub phash_max_distance: u32,
}

/// Ingestion worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Concurrent document workers
    #[serde(default = "default_ingest_workers")]
    pub workers: usize,

    /// Jobs that may wait for a worker before submissions are delayed/rejected
    #[serde(default = "default_ingest_queue_capacity")]
    pub queue_capacity: usize,

    /// Retries per embedding call on transient errors
    #[serde(default = "default_embed_retries")]
    pub embed_retries: usize,

    /// Linear backoff step between retries (milliseconds)
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

/// Retrieval fusion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Enable dense-vector search
    #[serde(default = "default_strategy_enabled")]
    pub vector_enabled: bool,

    /// Enable keyword overlap search
    #[serde(default = "default_strategy_enabled")]
    pub keyword_enabled: bool,

    /// Enable lexical full-text search
    #[serde(default = "default_strategy_enabled")]
    pub fulltext_enabled: bool,

    /// Also search the visual space with the query text
    #[serde(default = "default_cross_modal")]
    pub cross_modal: bool,

    /// Candidates fetched per strategy
    #[serde(default = "default_strategy_top_k")]
    pub strategy_top_k: usize,

    /// Base vector similarity threshold (0.0 - 1.0)
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Threshold relaxation for very short queries
    #[serde(default = "default_short_query_relax")]
    pub short_query_relax: f32,

    /// Threshold tightening for long queries
    #[serde(default = "default_long_query_tighten")]
    pub long_query_tighten: f32,

    /// Per-strategy deadline (milliseconds)
    #[serde(default = "default_strategy_timeout_ms")]
    pub strategy_timeout_ms: u64,

    /// Overall fan-out deadline (milliseconds)
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Reciprocal rank fusion constant
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f32,

    /// Default maximum chunks in the context
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,

    /// Default token budget for the context
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Relevance cutoff applied during screening (unset = derive from keywords)
    #[serde(default = "default_retrieval_min_relevance")]
    pub min_relevance_score: Option<f32>,

    /// Screened pool size as a multiple of max_chunks
    #[serde(default = "default_rerank_pool_factor")]
    pub rerank_pool_factor: usize,

    /// Keyword-count relevance cutoffs used when `min_relevance_score` is unset
    #[serde(default)]
    pub screening: ScreeningDefaults,
}

/// Reranker configuration (cross-encoder model for result reranking)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    /// Enable reranking of the screened pool
    #[serde(default = "default_reranker_enabled")]
    pub enabled: bool,

    /// Model name/identifier for cross-encoder reranker
    #[serde(default = "default_reranker_model")]
    pub model: String,

    /// Reranker backend URL
    #[serde(default = "default_reranker_backend_url")]
    pub backend_url: String,

    /// Rerank deadline (milliseconds)
    #[serde(default = "default_reranker_timeout_ms")]
    pub timeout_ms: u64,

    /// Whether the reranker can score image chunks
    #[serde(default)]
    pub supports_multimodal: bool,
}

/// Internal paths configuration
#[derive(Debug, Clone, Default)]
pub struct PathsConfig {
    /// Base directory for docfuse data
    pub base_dir: PathBuf,

    /// Path to config file
    pub config_file: PathBuf,

    /// Path to SQLite database
    pub db_file: PathBuf,

    /// Directory for cached image assets
    pub assets_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            qdrant_url: default_qdrant_url(),
            collection_prefix: default_collection_prefix(),
            embedding: EmbeddingConfig::default(),
            visual_embedding: VisualEmbeddingConfig::default(),
            extraction: ExtractionConfig::default(),
            chunk: ChunkConfig::default(),
            dedup: DedupConfig::default(),
            ingest: IngestConfig::default(),
            retrieval: RetrievalConfig::default(),
            reranker: RerankerConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            backend_url: default_embedding_backend_url(),
            batch_size: default_embedding_batch_size(),
            timeout_secs: default_embedding_timeout_secs(),
        }
    }
}

impl Default for VisualEmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: default_visual_enabled(),
            model: default_visual_model(),
            dimension: default_visual_dimension(),
            backend_url: None,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: default_extraction_provider(),
            model_profile: default_model_profile(),
            backend_url: default_extraction_backend_url(),
            timeout_secs: default_extraction_timeout_secs(),
            max_error_chars: default_max_error_chars(),
        }
    }
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            strategy: default_chunk_strategy(),
            max_chars: default_chunk_max_chars(),
            overlap_chars: default_chunk_overlap(),
            min_chars: default_chunk_min_chars(),
            max_keywords: default_chunk_max_keywords(),
        }
    }
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            phash_max_distance: default_phash_max_distance(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_ingest_workers(),
            queue_capacity: default_ingest_queue_capacity(),
            embed_retries: default_embed_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_enabled: true,
            keyword_enabled: true,
            fulltext_enabled: true,
            cross_modal: default_cross_modal(),
            strategy_top_k: default_strategy_top_k(),
            similarity_threshold: default_similarity_threshold(),
            short_query_relax: default_short_query_relax(),
            long_query_tighten: default_long_query_tighten(),
            strategy_timeout_ms: default_strategy_timeout_ms(),
            query_timeout_ms: default_query_timeout_ms(),
            rrf_k: default_rrf_k(),
            max_chunks: default_max_chunks(),
            max_tokens: default_max_tokens(),
            min_relevance_score: default_retrieval_min_relevance(),
            rerank_pool_factor: default_rerank_pool_factor(),
            screening: ScreeningDefaults::default(),
        }
    }
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: default_reranker_enabled(),
            model: default_reranker_model(),
            backend_url: default_reranker_backend_url(),
            timeout_ms: default_reranker_timeout_ms(),
            supports_multimodal: false,
        }
    }
}

impl EmbeddingConfig {
    /// Resolve the effective embedding dimension based on the configured model
    pub fn resolved_dimension(&self) -> usize {
        resolve_dimension(&self.model, self.dimension)
    }
}

impl VisualEmbeddingConfig {
    /// Resolve the effective embedding dimension based on the configured model
    pub fn resolved_dimension(&self) -> usize {
        resolve_dimension(&self.model, self.dimension)
    }

    /// Backend URL, falling back to the text embedding backend
    pub fn backend_url<'a>(&'a self, embedding: &'a EmbeddingConfig) -> &'a str {
        self.backend_url.as_deref().unwrap_or(&embedding.backend_url)
    }
}

fn resolve_dimension(model: &str, configured: usize) -> usize {
    if let Some(expected) = embedding_dimension_for_model(model) {
        if expected != configured {
            warn!(
                "Embedding dimension {} does not match model '{}' ({}); using {}",
                configured, model, expected, expected
            );
        }
        expected
    } else {
        configured
    }
}

impl RetrievalConfig {
    pub fn strategy_timeout(&self) -> Duration {
        Duration::from_millis(self.strategy_timeout_ms)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl Config {
    /// Get the default base directory for docfuse (~/.docfuse)
    pub fn default_base_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".docfuse")
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        Self::default_base_dir().join("config.toml")
    }

    /// Initialize paths configuration
    pub fn init_paths(&mut self, base_dir: Option<PathBuf>) {
        let base = base_dir.unwrap_or_else(Self::default_base_dir);
        self.paths = PathsConfig::under(base);
    }

    /// Load configuration from a specific file path
    pub fn load(config_path: &Path) -> Result<Self> {
        debug!("Loading config from {:?}", config_path);

        if !config_path.exists() {
            return Err(Error::Config(format!(
                "Config file not found: {}",
                config_path.display()
            )));
        }

        let content = std::fs::read_to_string(config_path)?;
        let mut config: Config = toml::from_str(&content)?;

        // Set up paths based on config file location
        let base = config_path.parent().unwrap_or(Path::new(".")).to_path_buf();
        config.paths = PathsConfig::under(base);
        config.paths.config_file = config_path.to_path_buf();

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific base directory
    pub fn load_from(base_dir: Option<PathBuf>) -> Result<Self> {
        let mut config = Config::default();
        config.init_paths(base_dir);

        if config.paths.config_file.exists() {
            debug!("Loading config from {:?}", config.paths.config_file);
            let content = std::fs::read_to_string(&config.paths.config_file)?;
            let mut loaded: Config = toml::from_str(&content)?;
            loaded.paths = config.paths;
            config = loaded;
        } else {
            debug!("No config file found, using defaults");
        }

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.paths.config_file.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&self.paths.config_file, content)?;
        info!("Saved config to {:?}", self.paths.config_file);
        Ok(())
    }

    /// Qdrant collection holding text vectors
    pub fn text_collection(&self) -> String {
        format!("{}_text", self.collection_prefix)
    }

    /// Qdrant collection holding visual vectors
    pub fn visual_collection(&self) -> String {
        format!("{}_visual", self.collection_prefix)
    }

    /// Check if docfuse is initialized (config and DB exist)
    pub fn is_initialized(&self) -> bool {
        self.paths.config_file.exists() && self.paths.db_file.exists()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.chunk.max_chars < self.chunk.min_chars {
            return Err(Error::Config(
                "chunk.max_chars must be >= chunk.min_chars".to_string(),
            ));
        }

        if self.chunk.overlap_chars >= self.chunk.max_chars {
            return Err(Error::Config(
                "chunk.overlap_chars must be < chunk.max_chars".to_string(),
            ));
        }

        if self.embedding.batch_size == 0 {
            return Err(Error::Config(
                "embedding.batch_size must be positive".to_string(),
            ));
        }

        match self.embedding.provider.as_str() {
            "http" => {}
            "local" if cfg!(feature = "local-embed") => {}
            "local" => {
                return Err(Error::Config(
                    "embedding.provider 'local' requires the 'local-embed' feature".to_string(),
                ))
            }
            other => {
                return Err(Error::Config(format!(
                    "Unknown embedding provider '{}'; expected 'http' or 'local'",
                    other
                )))
            }
        }

        if !matches!(self.extraction.provider.as_str(), "local" | "http") {
            return Err(Error::Config(format!(
                "Unknown extraction provider '{}'; expected 'local' or 'http'",
                self.extraction.provider
            )));
        }

        if self.visual_embedding.enabled {
            if let Some(caps) = embedding_model_capabilities(&self.visual_embedding.model) {
                if !caps.supports_image {
                    return Err(Error::Config(format!(
                        "visual_embedding.model '{}' does not accept image inputs",
                        self.visual_embedding.model
                    )));
                }
            }
        }

        if self.dedup.phash_max_distance >= 64 {
            return Err(Error::Config(
                "dedup.phash_max_distance must be < 64".to_string(),
            ));
        }

        if self.ingest.workers == 0 || self.ingest.queue_capacity == 0 {
            return Err(Error::Config(
                "ingest.workers and ingest.queue_capacity must be positive".to_string(),
            ));
        }

        let r = &self.retrieval;
        if !(0.0..=1.0).contains(&r.similarity_threshold) {
            return Err(Error::Config(
                "retrieval.similarity_threshold must be between 0.0 and 1.0".to_string(),
            ));
        }

        if !r.vector_enabled && !r.keyword_enabled && !r.fulltext_enabled {
            return Err(Error::Config(
                "at least one retrieval strategy must be enabled".to_string(),
            ));
        }

        if r.rrf_k <= 0.0 {
            return Err(Error::Config("retrieval.rrf_k must be positive".to_string()));
        }

        if r.strategy_timeout_ms == 0 || r.query_timeout_ms == 0 {
            return Err(Error::Config(
                "retrieval timeouts must be positive".to_string(),
            ));
        }

        if r.max_chunks == 0 || r.rerank_pool_factor == 0 {
            return Err(Error::Config(
                "retrieval.max_chunks and retrieval.rerank_pool_factor must be positive"
                    .to_string(),
            ));
        }

        if self.reranker.supports_multimodal && !self.reranker.enabled {
            return Err(Error::Config(
                "reranker.supports_multimodal requires reranker.enabled = true".to_string(),
            ));
        }

        Ok(())
    }
}

impl PathsConfig {
    /// Standard layout under a base directory
    pub fn under(base: PathBuf) -> Self {
        Self {
            config_file: base.join("config.toml"),
            db_file: base.join("metadata.db"),
            assets_dir: base.join("assets"),
            base_dir: base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.collection_prefix, "docfuse");
        assert_eq!(config.text_collection(), "docfuse_text");
        assert_eq!(config.visual_collection(), "docfuse_visual");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().to_path_buf()));
        config.collection_prefix = "test_prefix".to_string();
        config.retrieval.max_tokens = 512;

        config.save().unwrap();
        assert!(config.paths.config_file.exists());

        let loaded = Config::load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(loaded.collection_prefix, "test_prefix");
        assert_eq!(loaded.retrieval.max_tokens, 512);
        assert_eq!(loaded.paths.assets_dir, tmp.path().join("assets"));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [retrieval]
            keyword_enabled = false
            "#,
        )
        .unwrap();

        assert!(!config.retrieval.keyword_enabled);
        assert!(config.retrieval.vector_enabled);
        assert_eq!(config.dedup.phash_max_distance, 5);
        assert_eq!(config.retrieval.min_relevance_score, Some(0.0));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.chunk.overlap_chars = config.chunk.max_chars;
        assert!(config.validate().is_err());
        config.chunk.overlap_chars = 100;
        assert!(config.validate().is_ok());

        config.retrieval.vector_enabled = false;
        config.retrieval.keyword_enabled = false;
        config.retrieval.fulltext_enabled = false;
        assert!(config.validate().is_err());
        config.retrieval.fulltext_enabled = true;
        assert!(config.validate().is_ok());

        config.extraction.provider = "ocr-magic".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolved_dimension_matches_model() {
        let mut config = Config::default();
        config.embedding.model = "BAAI/bge-base-en-v1.5".to_string();
        config.embedding.dimension = 384;

        assert_eq!(config.embedding.resolved_dimension(), 768);
    }

    #[test]
    fn test_resolved_dimension_unknown_model_falls_back() {
        let mut config = Config::default();
        config.embedding.model = "custom-model".to_string();
        config.embedding.dimension = 512;

        assert_eq!(config.embedding.resolved_dimension(), 512);
    }

    #[test]
    fn test_visual_backend_falls_back_to_text_backend() {
        let mut config = Config::default();
        config.embedding.backend_url = "http://embed:7997".to_string();
        assert_eq!(
            config.visual_embedding.backend_url(&config.embedding),
            "http://embed:7997"
        );

        config.visual_embedding.backend_url = Some("http://clip:9000".to_string());
        assert_eq!(
            config.visual_embedding.backend_url(&config.embedding),
            "http://clip:9000"
        );
    }

    #[test]
    fn test_reranker_multimodal_requires_enabled() {
        let mut config = Config::default();
        config.reranker.supports_multimodal = true;
        config.reranker.enabled = false;
        assert!(config.validate().is_err());

        config.reranker.enabled = true;
        assert!(config.validate().is_ok());
    }
}
