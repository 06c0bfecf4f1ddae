//! Retrieval strategies and the registry the fusion engine dispatches to

use crate::chunk::query_length;
use crate::config::RetrievalConfig;
use crate::embed::MultiVectorEmbedder;
use crate::error::{Error, Result};
use crate::index::{SearchChunk, SearchIndex, VectorQuery};
use crate::meta::{SearchScope, VectorKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Independent search primitive invoked during fan-out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyKind {
    Vector,
    Keyword,
    Fulltext,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 3] = [
        StrategyKind::Vector,
        StrategyKind::Keyword,
        StrategyKind::Fulltext,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Vector => "vector",
            StrategyKind::Keyword => "keyword",
            StrategyKind::Fulltext => "fulltext",
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "vector" => Ok(StrategyKind::Vector),
            "keyword" => Ok(StrategyKind::Keyword),
            "fulltext" => Ok(StrategyKind::Fulltext),
            _ => Err(Error::Config(format!("Unknown retrieval strategy: {}", s))),
        }
    }
}

/// Everything a strategy needs for one query. Shared across the fan-out
/// tasks, so it owns its data.
#[derive(Debug, Clone)]
pub struct StrategyRequest {
    pub query: String,
    /// Normalized query keywords
    pub keywords: Vec<String>,
    pub top_k: usize,
    /// Vector similarity floor, already adjusted for query length
    pub min_similarity: f32,
    pub scope: SearchScope,
}

#[async_trait]
pub trait RetrievalStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn search(&self, request: &StrategyRequest) -> Result<Vec<SearchChunk>>;
}

/// Vector similarity threshold adjusted for query length, clamped to [0, 1]
pub fn adapt_threshold(base: f32, query: &str, config: &RetrievalConfig) -> f32 {
    let tokens = query_length(query);
    let adjusted = if tokens <= 2 {
        base - config.short_query_relax
    } else if tokens >= 8 {
        base + config.long_query_tighten
    } else {
        base
    };
    adjusted.clamp(0.0, 1.0)
}

/// Dense-vector search in the text space, plus the cross-modal space when
/// enabled and a visual model is configured
pub struct VectorStrategy {
    index: Arc<dyn SearchIndex>,
    embedder: Arc<MultiVectorEmbedder>,
    cross_modal: bool,
}

impl VectorStrategy {
    pub fn new(index: Arc<dyn SearchIndex>, embedder: Arc<MultiVectorEmbedder>, cross_modal: bool) -> Self {
        Self {
            index,
            embedder,
            cross_modal,
        }
    }

    async fn search_visual(&self, request: &StrategyRequest) -> Result<Vec<SearchChunk>> {
        let Some(vector) = self.embedder.embed_query_visual(&request.query).await? else {
            return Ok(Vec::new());
        };
        let query = VectorQuery {
            vector,
            space: VectorKind::Visual,
        };
        self.index
            .vector_search(&query, request.top_k, request.min_similarity, &request.scope)
            .await
    }
}

#[async_trait]
impl RetrievalStrategy for VectorStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Vector
    }

    async fn search(&self, request: &StrategyRequest) -> Result<Vec<SearchChunk>> {
        let query = VectorQuery {
            vector: self.embedder.embed_query(&request.query).await?,
            space: VectorKind::Text,
        };
        let mut hits = self
            .index
            .vector_search(&query, request.top_k, request.min_similarity, &request.scope)
            .await?;

        if self.cross_modal && self.embedder.has_visual() {
            match self.search_visual(request).await {
                Ok(visual) => {
                    debug!(hits = visual.len(), "Cross-modal vector search");
                    hits.extend(visual);
                }
                // The text-space result still stands on its own
                Err(err) => warn!("Cross-modal vector search failed: {}", err),
            }
        }

        // One entry per chunk, best score across spaces
        let mut best: HashMap<String, SearchChunk> = HashMap::new();
        for hit in hits {
            match best.get(&hit.chunk_id) {
                Some(existing) if existing.score >= hit.score => {}
                _ => {
                    best.insert(hit.chunk_id.clone(), hit);
                }
            }
        }
        let mut merged: Vec<SearchChunk> = best.into_values().collect();
        merged.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        merged.truncate(request.top_k);
        Ok(merged)
    }
}

/// Overlap between query keywords and per-chunk keywords
pub struct KeywordStrategy {
    index: Arc<dyn SearchIndex>,
}

impl KeywordStrategy {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl RetrievalStrategy for KeywordStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Keyword
    }

    async fn search(&self, request: &StrategyRequest) -> Result<Vec<SearchChunk>> {
        self.index
            .keyword_search(&request.keywords, request.top_k, &request.scope)
            .await
    }
}

/// Lexical full-text search
pub struct FulltextStrategy {
    index: Arc<dyn SearchIndex>,
}

impl FulltextStrategy {
    pub fn new(index: Arc<dyn SearchIndex>) -> Self {
        Self { index }
    }
}

#[async_trait]
impl RetrievalStrategy for FulltextStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Fulltext
    }

    async fn search(&self, request: &StrategyRequest) -> Result<Vec<SearchChunk>> {
        self.index
            .fulltext_search(&request.query, request.top_k, &request.scope)
            .await
    }
}

/// Strategies available to the fusion engine, keyed by kind
#[derive(Default, Clone)]
pub struct StrategyRegistry {
    strategies: BTreeMap<StrategyKind, Arc<dyn RetrievalStrategy>>,
}

impl StrategyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The three built-in strategies, minus those disabled in `config`
    pub fn standard(
        index: Arc<dyn SearchIndex>,
        embedder: Arc<MultiVectorEmbedder>,
        config: &RetrievalConfig,
    ) -> Self {
        let mut registry = Self::new();
        if config.vector_enabled {
            registry.register(Arc::new(VectorStrategy::new(
                index.clone(),
                embedder,
                config.cross_modal,
            )));
        }
        if config.keyword_enabled {
            registry.register(Arc::new(KeywordStrategy::new(index.clone())));
        }
        if config.fulltext_enabled {
            registry.register(Arc::new(FulltextStrategy::new(index)));
        }
        registry
    }

    /// Add or replace the strategy for its kind
    pub fn register(&mut self, strategy: Arc<dyn RetrievalStrategy>) {
        self.strategies.insert(strategy.kind(), strategy);
    }

    pub fn get(&self, kind: StrategyKind) -> Option<&Arc<dyn RetrievalStrategy>> {
        self.strategies.get(&kind)
    }

    /// Registered kinds in fixed order
    pub fn kinds(&self) -> Vec<StrategyKind> {
        self.strategies.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::tests::FakeEmbedder;
    use crate::embed::{EmbeddingInput, MultiVectorEmbedder};
    use crate::index::tests::publish_chunks;
    use crate::index::IndexStore;
    use crate::meta::tests::{insert_test_document, setup_test_db};
    use crate::meta::Modality;
    use crate::models::DimensionRegistry;
    use crate::store::InMemoryVectorStore;

    #[test]
    fn test_adapt_threshold() {
        let config = RetrievalConfig::default();
        assert!((adapt_threshold(0.35, "bert", &config) - 0.30).abs() < 1e-6);
        assert!((adapt_threshold(0.35, "how does bert differ", &config) - 0.35).abs() < 1e-6);
        let long = "how does the attention mechanism in bert differ from gpt models";
        assert!((adapt_threshold(0.35, long, &config) - 0.40).abs() < 1e-6);
        assert_eq!(adapt_threshold(0.02, "x", &config), 0.0);
        assert_eq!(adapt_threshold(0.99, long, &config), 1.0);
    }

    #[test]
    fn test_registry_respects_config() {
        let text: Arc<dyn crate::embed::Embedder> = Arc::new(FakeEmbedder::new("fake", 8));
        let embedder = Arc::new(MultiVectorEmbedder::new(text, None, DimensionRegistry::builtin(), 4));
        let index: Arc<dyn SearchIndex> = Arc::new(NoIndex);

        let mut config = RetrievalConfig::default();
        config.fulltext_enabled = false;
        let registry = StrategyRegistry::standard(index, embedder, &config);
        assert_eq!(registry.kinds(), vec![StrategyKind::Vector, StrategyKind::Keyword]);
        assert!(registry.get(StrategyKind::Fulltext).is_none());
    }

    struct NoIndex;

    #[async_trait]
    impl SearchIndex for NoIndex {
        async fn vector_search(
            &self,
            _query: &VectorQuery,
            _top_k: usize,
            _min_similarity: f32,
            _scope: &SearchScope,
        ) -> Result<Vec<SearchChunk>> {
            Ok(Vec::new())
        }

        async fn keyword_search(
            &self,
            _keywords: &[String],
            _top_k: usize,
            _scope: &SearchScope,
        ) -> Result<Vec<SearchChunk>> {
            Ok(Vec::new())
        }

        async fn fulltext_search(
            &self,
            _query_text: &str,
            _top_k: usize,
            _scope: &SearchScope,
        ) -> Result<Vec<SearchChunk>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_vector_strategy_end_to_end() {
        let (db, _tmp) = setup_test_db().await;
        let doc = insert_test_document(&db, "papers").await;
        let chunks = publish_chunks(
            &db,
            &doc,
            &[
                (Modality::Text, "bidirectional encoder representations"),
                (Modality::Text, "autoregressive decoder only"),
            ],
        )
        .await;

        let fake = Arc::new(FakeEmbedder::new("fake", 8));
        let mut registry = DimensionRegistry::builtin();
        registry.register("fake", 8);
        let embedder = Arc::new(MultiVectorEmbedder::new(fake, None, registry.clone(), 4));

        let inputs: Vec<EmbeddingInput> = chunks
            .iter()
            .map(|c| EmbeddingInput::from_chunk(c).unwrap())
            .collect();
        let results = embedder.embed(&inputs).await.unwrap();

        let index = Arc::new(IndexStore::new(
            db,
            Arc::new(InMemoryVectorStore::new("t_text", 8)),
            None,
        ));
        let models = HashMap::from([(VectorKind::Text, "fake".to_string())]);
        index
            .index_embeddings("papers", &chunks, &results, &models, &registry)
            .await
            .unwrap();

        let strategy = VectorStrategy::new(index, embedder, true);
        let hits = strategy
            .search(&StrategyRequest {
                query: "bidirectional encoder representations".to_string(),
                keywords: Vec::new(),
                top_k: 5,
                min_similarity: 0.0,
                scope: SearchScope::default(),
            })
            .await
            .unwrap();
        assert_eq!(hits[0].chunk_id, chunks[0].id);
        assert!((hits[0].score - 1.0).abs() < 1e-4);
    }
}
