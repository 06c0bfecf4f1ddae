//! Default values for configuration

/// Default Qdrant gRPC URL for local development (port 6334, not 6333 REST)
pub fn default_qdrant_url() -> String {
    std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6334".to_string())
}

/// Default collection prefix; collections are `{prefix}_text` and `{prefix}_visual`
pub fn default_collection_prefix() -> String {
    "docfuse".to_string()
}

/// Default embedding provider ("http" sidecar; "local" needs the local-embed feature)
pub fn default_embedding_provider() -> String {
    "http".to_string()
}

/// Default text embedding model (multilingual, handles Korean and English)
pub fn default_embedding_model() -> String {
    "BAAI/bge-m3".to_string()
}

/// Default text embedding dimension
pub fn default_embedding_dimension() -> usize {
    1024
}

/// Default embedding backend URL
pub fn default_embedding_backend_url() -> String {
    std::env::var("DOCFUSE_EMBEDDING_BACKEND_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:7997".to_string())
}

/// Default batch size for embedding
pub fn default_embedding_batch_size() -> usize {
    32
}

/// Default embedding request timeout in seconds
pub fn default_embedding_timeout_secs() -> u64 {
    30
}

/// Default cross-modal embedding model
pub fn default_visual_model() -> String {
    "openai/clip-vit-base-patch32".to_string()
}

/// Default cross-modal embedding dimension
pub fn default_visual_dimension() -> usize {
    512
}

/// Default: visual embeddings enabled
pub fn default_visual_enabled() -> bool {
    true
}

/// Default extraction provider
pub fn default_extraction_provider() -> String {
    "local".to_string()
}

/// Default extraction model profile
pub fn default_model_profile() -> String {
    "default".to_string()
}

/// Default extraction sidecar URL
pub fn default_extraction_backend_url() -> String {
    std::env::var("DOCFUSE_EXTRACTION_BACKEND_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:7998".to_string())
}

/// Default maximum stored error message length (characters)
pub fn default_max_error_chars() -> usize {
    1000
}

/// Default extraction request timeout in seconds
pub fn default_extraction_timeout_secs() -> u64 {
    120
}

/// Default chunking strategy
pub fn default_chunk_strategy() -> String {
    "modality_aware".to_string()
}

/// Default maximum characters per chunk
pub fn default_chunk_max_chars() -> usize {
    1500
}

/// Default minimum characters per chunk
pub fn default_chunk_min_chars() -> usize {
    100
}

/// Default overlap characters between chunks
pub fn default_chunk_overlap() -> usize {
    200
}

/// Default maximum keywords stored per chunk
pub fn default_chunk_max_keywords() -> usize {
    32
}

/// Default perceptual hash Hamming threshold
pub fn default_phash_max_distance() -> u32 {
    5
}

/// Default number of ingestion workers
pub fn default_ingest_workers() -> usize {
    4
}

/// Default ingestion queue capacity
pub fn default_ingest_queue_capacity() -> usize {
    64
}

/// Default retries for embedding calls
pub fn default_embed_retries() -> usize {
    2
}

/// Default linear backoff step between retries (milliseconds)
pub fn default_retry_backoff_ms() -> u64 {
    200
}

/// Default candidates fetched per strategy
pub fn default_strategy_top_k() -> usize {
    20
}

/// Default vector similarity threshold
pub fn default_similarity_threshold() -> f32 {
    0.35
}

/// Default threshold relaxation for very short queries
pub fn default_short_query_relax() -> f32 {
    0.05
}

/// Default threshold tightening for long queries
pub fn default_long_query_tighten() -> f32 {
    0.05
}

/// Default per-strategy deadline (milliseconds)
pub fn default_strategy_timeout_ms() -> u64 {
    3000
}

/// Default overall fan-out deadline (milliseconds)
pub fn default_query_timeout_ms() -> u64 {
    5000
}

/// Default RRF smoothing constant
pub fn default_rrf_k() -> f32 {
    60.0
}

/// Default maximum chunks in the assembled context
pub fn default_max_chunks() -> usize {
    8
}

/// Default token budget for the assembled context
pub fn default_max_tokens() -> usize {
    3000
}

/// Default relevance cutoff for retrieval screening (0 keeps semantic-only hits)
pub fn default_retrieval_min_relevance() -> Option<f32> {
    Some(0.0)
}

/// Default screened pool size relative to max_chunks
pub fn default_rerank_pool_factor() -> usize {
    3
}

/// Default: all strategies enabled
pub fn default_strategy_enabled() -> bool {
    true
}

/// Default: cross-modal vector search enabled
pub fn default_cross_modal() -> bool {
    true
}

/// Default reranker model (cross-encoder)
pub fn default_reranker_model() -> String {
    "BAAI/bge-reranker-v2-m3".to_string()
}

/// Default: reranker disabled
pub fn default_reranker_enabled() -> bool {
    false
}

/// Default reranker backend URL
pub fn default_reranker_backend_url() -> String {
    std::env::var("DOCFUSE_RERANKER_BACKEND_URL")
        .unwrap_or_else(|_| "http://127.0.0.1:7997".to_string())
}

/// Default rerank deadline (milliseconds)
pub fn default_reranker_timeout_ms() -> u64 {
    2000
}
