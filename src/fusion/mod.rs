//! Retrieval fusion engine.
//!
//! One query fans out to the strategies its intent selects, each under its
//! own deadline. Whatever succeeds is fused, screened, optionally reranked
//! and packed into a token-bounded context. Individual strategy failures
//! degrade the response; only a total failure is an error.

mod context;
mod intent;
mod merge;
mod strategy;

pub use context::*;
pub use intent::*;
pub use merge::*;
pub use strategy::*;

use crate::chunk::query_keywords;
use crate::config::RetrievalConfig;
use crate::error::{Error, Result};
use crate::meta::{Modality, SearchScope};
use crate::rerank::{reorder, Reranker};
use crate::screen::{screen_and_rank_with, Screened, ScreeningDefaults};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// A retrieval request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub container_ids: Vec<String>,
    #[serde(default)]
    pub document_ids: Vec<String>,
    pub max_chunks: Option<usize>,
    pub max_tokens: Option<usize>,
    /// Base vector similarity threshold before length adjustment
    pub similarity_threshold: Option<f32>,
    pub intent: Option<QueryIntent>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    fn scope(&self) -> SearchScope {
        SearchScope {
            container_ids: self.container_ids.clone(),
            document_ids: self.document_ids.clone(),
        }
    }
}

/// Where a context chunk came from
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Provenance {
    pub chunk_id: String,
    pub document_id: String,
    pub score: f32,
    pub rerank_score: Option<f32>,
    pub modality: Modality,
    pub page_no: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryMetrics {
    pub strategies_invoked: usize,
    pub strategies_failed: usize,
    pub total_latency_ms: u64,
    /// Distinct chunks found across strategies
    pub chunks_found: usize,
    pub chunks_used: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResponse {
    pub context: String,
    pub provenance: Vec<Provenance>,
    pub intent: QueryIntent,
    /// Some strategy failed or timed out
    pub degraded: bool,
    pub failed_strategies: Vec<StrategyKind>,
    pub rerank_degraded: bool,
    pub context_tokens: usize,
    pub metrics: QueryMetrics,
}

pub struct FusionEngine {
    registry: StrategyRegistry,
    reranker: Option<Arc<dyn Reranker>>,
    config: RetrievalConfig,
    rerank_timeout: Duration,
    screening: ScreeningDefaults,
}

impl FusionEngine {
    pub fn new(
        registry: StrategyRegistry,
        reranker: Option<Arc<dyn Reranker>>,
        config: RetrievalConfig,
        rerank_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            reranker,
            config,
            rerank_timeout,
            screening: ScreeningDefaults::default(),
        }
    }

    pub fn with_screening(mut self, screening: ScreeningDefaults) -> Self {
        self.screening = screening;
        self
    }

    pub fn registry(&self) -> &StrategyRegistry {
        &self.registry
    }

    /// Strategies to invoke for `intent`, limited to what is registered.
    /// Falls back to every registered strategy when the intersection is
    /// empty.
    pub fn plan(&self, intent: QueryIntent) -> Vec<StrategyKind> {
        let planned: Vec<StrategyKind> = intent
            .strategies()
            .iter()
            .copied()
            .filter(|kind| self.registry.get(*kind).is_some())
            .collect();
        if planned.is_empty() {
            self.registry.kinds()
        } else {
            planned
        }
    }

    pub async fn retrieve(&self, request: &QueryRequest) -> Result<RetrievalResponse> {
        let started = Instant::now();
        let intent = request
            .intent
            .unwrap_or_else(|| QueryIntent::classify(&request.query));
        let max_chunks = request.max_chunks.unwrap_or(self.config.max_chunks);
        let max_tokens = request.max_tokens.unwrap_or(self.config.max_tokens);

        if request.query.trim().is_empty() {
            return Ok(RetrievalResponse::empty(intent));
        }
        if self.registry.is_empty() {
            return Err(Error::RetrievalUnavailable(
                "no retrieval strategies are registered".to_string(),
            ));
        }

        let base_threshold = request
            .similarity_threshold
            .unwrap_or(self.config.similarity_threshold);
        let strategy_request = Arc::new(StrategyRequest {
            query: request.query.clone(),
            keywords: query_keywords(&request.query),
            top_k: self.config.strategy_top_k,
            min_similarity: adapt_threshold(base_threshold, &request.query, &self.config),
            scope: request.scope(),
        });

        let kinds = self.plan(intent);
        debug!(
            intent = %intent,
            strategies = ?kinds,
            min_similarity = strategy_request.min_similarity,
            "Planned retrieval"
        );

        let (results, failed) = self.fan_out(&kinds, strategy_request).await;
        if results.is_empty() {
            return Err(Error::RetrievalUnavailable(format!(
                "all {} strategies failed ({})",
                kinds.len(),
                failed
                    .iter()
                    .map(|k| k.name())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        let pool = fuse(&results, self.config.rrf_k);
        let keywords = query_keywords(&request.query);
        let pool_size = max_chunks.saturating_mul(self.config.rerank_pool_factor);
        let (screened, stats) = screen_and_rank_with(
            &self.screening,
            pool,
            Some(&keywords),
            self.config.min_relevance_score,
            Some(pool_size),
        );
        debug!(
            total_in = stats.total_in,
            deduped = stats.deduped,
            low_relevance_dropped = stats.low_relevance_dropped,
            total_out = stats.total_out,
            "Screened fused candidates"
        );

        let (ranked, rerank_degraded) = self.rerank(&request.query, screened).await;

        let assembled = assemble_context(
            ranked.iter().map(|(s, _)| &s.candidate.chunk),
            max_chunks,
            max_tokens,
        );
        let provenance: Vec<Provenance> = ranked
            .iter()
            .take(assembled.chunks_used)
            .map(|(screened, rerank_score)| {
                let chunk = &screened.candidate.chunk;
                Provenance {
                    chunk_id: chunk.chunk_id.clone(),
                    document_id: chunk.document_id.clone(),
                    score: screened.score,
                    rerank_score: *rerank_score,
                    modality: chunk.modality,
                    page_no: chunk.metadata.page_no,
                }
            })
            .collect();

        let metrics = QueryMetrics {
            strategies_invoked: kinds.len(),
            strategies_failed: failed.len(),
            total_latency_ms: started.elapsed().as_millis() as u64,
            chunks_found: stats.total_in - stats.invalid_dropped - stats.deduped,
            chunks_used: assembled.chunks_used,
        };
        info!(
            intent = %intent,
            strategies_invoked = metrics.strategies_invoked,
            strategies_failed = metrics.strategies_failed,
            chunks_found = metrics.chunks_found,
            chunks_used = metrics.chunks_used,
            context_tokens = assembled.tokens,
            rerank_degraded,
            latency_ms = metrics.total_latency_ms,
            "Retrieval complete"
        );

        Ok(RetrievalResponse {
            context: assembled.text,
            provenance,
            intent,
            degraded: !failed.is_empty(),
            failed_strategies: failed,
            rerank_degraded,
            context_tokens: assembled.tokens,
            metrics,
        })
    }

    /// Run the strategies concurrently. Returns successful results in
    /// strategy order, and the kinds that failed or missed a deadline.
    async fn fan_out(
        &self,
        kinds: &[StrategyKind],
        request: Arc<StrategyRequest>,
    ) -> (Vec<StrategyHits>, Vec<StrategyKind>) {
        let strategy_timeout = self.config.strategy_timeout();
        let mut tasks = JoinSet::new();
        let mut pending: BTreeSet<StrategyKind> = BTreeSet::new();

        for &kind in kinds {
            let Some(strategy) = self.registry.get(kind).cloned() else {
                continue;
            };
            pending.insert(kind);
            let request = request.clone();
            tasks.spawn(async move {
                let outcome = match tokio::time::timeout(strategy_timeout, strategy.search(&request)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(Error::Timeout(format!(
                        "{} strategy exceeded {}ms",
                        kind,
                        strategy_timeout.as_millis()
                    ))),
                };
                (kind, outcome)
            });
        }

        let deadline = tokio::time::Instant::now() + self.config.query_timeout();
        let mut results = Vec::new();
        let mut failed = Vec::new();

        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((kind, Ok(hits))))) => {
                    debug!(strategy = %kind, hits = hits.len(), "Strategy finished");
                    pending.remove(&kind);
                    results.push(StrategyHits { kind, hits });
                }
                Ok(Some(Ok((kind, Err(err))))) => {
                    warn!(strategy = %kind, "Strategy failed: {}", err);
                    pending.remove(&kind);
                    failed.push(kind);
                }
                Ok(Some(Err(err))) => {
                    // Reported below through `pending`
                    warn!("Strategy task aborted: {}", err);
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        pending = ?pending,
                        "Retrieval deadline of {}ms reached",
                        self.config.query_timeout_ms
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        failed.extend(pending);
        failed.sort();
        results.sort_by_key(|r| r.kind);
        (results, failed)
    }

    /// Rerank the screened pool under its own deadline. On failure the
    /// screened order stands.
    async fn rerank(
        &self,
        query: &str,
        screened: Vec<Screened<FusedCandidate>>,
    ) -> (Vec<(Screened<FusedCandidate>, Option<f32>)>, bool) {
        let Some(reranker) = &self.reranker else {
            return (screened.into_iter().map(|s| (s, None)).collect(), false);
        };
        if screened.is_empty() {
            return (Vec::new(), false);
        }

        let documents: Vec<String> = screened
            .iter()
            .map(|s| s.candidate.chunk.content.clone())
            .collect();
        match tokio::time::timeout(self.rerank_timeout, reranker.rerank(query, documents)).await {
            Ok(Ok(results)) => (reorder(screened, results), false),
            Ok(Err(err)) => {
                warn!(model = reranker.model_name(), "Rerank failed: {}", err);
                (screened.into_iter().map(|s| (s, None)).collect(), true)
            }
            Err(_) => {
                warn!(
                    model = reranker.model_name(),
                    "Rerank exceeded {}ms",
                    self.rerank_timeout.as_millis()
                );
                (screened.into_iter().map(|s| (s, None)).collect(), true)
            }
        }
    }
}

impl RetrievalResponse {
    fn empty(intent: QueryIntent) -> Self {
        Self {
            context: String::new(),
            provenance: Vec::new(),
            intent,
            degraded: false,
            failed_strategies: Vec::new(),
            rerank_degraded: false,
            context_tokens: 0,
            metrics: QueryMetrics::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{ChunkMetadata, SearchChunk};
    use crate::rerank::RerankResult;
    use async_trait::async_trait;

    fn hit(id: &str, content: &str, score: f32) -> SearchChunk {
        SearchChunk {
            chunk_id: id.to_string(),
            document_id: "doc-1".to_string(),
            content: content.to_string(),
            score,
            modality: Modality::Text,
            metadata: ChunkMetadata {
                page_no: Some(1),
                title: Some("Models".to_string()),
            },
        }
    }

    enum Behavior {
        Hits(Vec<SearchChunk>),
        Fail,
        Hang,
    }

    struct Scripted {
        kind: StrategyKind,
        behavior: Behavior,
    }

    #[async_trait]
    impl RetrievalStrategy for Scripted {
        fn kind(&self) -> StrategyKind {
            self.kind
        }

        async fn search(&self, _request: &StrategyRequest) -> Result<Vec<SearchChunk>> {
            match &self.behavior {
                Behavior::Hits(hits) => Ok(hits.clone()),
                Behavior::Fail => Err(Error::Qdrant("connection refused".to_string())),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(Vec::new())
                }
            }
        }
    }

    fn registry(strategies: Vec<(StrategyKind, Behavior)>) -> StrategyRegistry {
        let mut registry = StrategyRegistry::new();
        for (kind, behavior) in strategies {
            registry.register(Arc::new(Scripted { kind, behavior }));
        }
        registry
    }

    fn config() -> RetrievalConfig {
        RetrievalConfig {
            strategy_timeout_ms: 100,
            query_timeout_ms: 500,
            ..RetrievalConfig::default()
        }
    }

    fn engine(registry: StrategyRegistry) -> FusionEngine {
        FusionEngine::new(registry, None, config(), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_two_of_three_failing_still_answers() {
        let engine = engine(registry(vec![
            (StrategyKind::Vector, Behavior::Fail),
            (StrategyKind::Keyword, Behavior::Hang),
            (
                StrategyKind::Fulltext,
                Behavior::Hits(vec![hit("c1", "graphene anode coating", 1.2)]),
            ),
        ]));

        let mut request = QueryRequest::new("graphene anode research overview");
        request.intent = Some(QueryIntent::Exploratory);
        let response = engine.retrieve(&request).await.unwrap();

        assert!(response.degraded);
        assert_eq!(
            response.failed_strategies,
            vec![StrategyKind::Vector, StrategyKind::Keyword]
        );
        assert_eq!(response.metrics.strategies_invoked, 3);
        assert_eq!(response.metrics.strategies_failed, 2);
        assert_eq!(response.provenance.len(), 1);
        assert!(response.context.starts_with("[1] Models (p. 1, text)\n"));
    }

    #[tokio::test]
    async fn test_all_failing_is_unavailable() {
        let engine = engine(registry(vec![
            (StrategyKind::Vector, Behavior::Fail),
            (StrategyKind::Keyword, Behavior::Fail),
        ]));
        let mut request = QueryRequest::new("BERT vs GPT");
        request.intent = Some(QueryIntent::Comparison);
        let result = engine.retrieve(&request).await;
        assert!(matches!(result, Err(Error::RetrievalUnavailable(_))));
    }

    #[tokio::test]
    async fn test_overall_deadline_aborts_pending() {
        let mut config = config();
        config.strategy_timeout_ms = 10_000;
        config.query_timeout_ms = 50;
        let engine = FusionEngine::new(
            registry(vec![
                (StrategyKind::Keyword, Behavior::Hang),
                (
                    StrategyKind::Fulltext,
                    Behavior::Hits(vec![hit("c1", "graphene anode", 1.0)]),
                ),
            ]),
            None,
            config,
            Duration::from_millis(100),
        );
        let mut request = QueryRequest::new("graphene anode");
        request.intent = Some(QueryIntent::Keyword);

        let started = Instant::now();
        let response = engine.retrieve(&request).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(response.failed_strategies, vec![StrategyKind::Keyword]);
        assert_eq!(response.metrics.chunks_used, 1);
    }

    #[tokio::test]
    async fn test_comparison_query_dedups_shared_hit() {
        let shared = hit("c1", "BERT와 GPT의 차이점: 인코더와 디코더", 0.82);
        let engine = engine(registry(vec![
            (
                StrategyKind::Vector,
                Behavior::Hits(vec![shared.clone(), hit("c2", "GPT 학습 데이터", 0.61)]),
            ),
            (StrategyKind::Keyword, Behavior::Hits(vec![SearchChunk { score: 1.0, ..shared }])),
            (StrategyKind::Fulltext, Behavior::Fail),
        ]));

        let response = engine.retrieve(&QueryRequest::new("BERT와 GPT 차이점")).await.unwrap();
        assert_eq!(response.intent, QueryIntent::Comparison);
        // Fulltext is outside the comparison plan, so nothing failed
        assert!(!response.degraded);
        assert_eq!(response.metrics.strategies_invoked, 2);

        let ids: Vec<&str> = response.provenance.iter().map(|p| p.chunk_id.as_str()).collect();
        assert_eq!(ids.iter().filter(|id| **id == "c1").count(), 1);
        assert_eq!(ids[0], "c1");
        assert_eq!(response.metrics.chunks_found, 2);
    }

    #[tokio::test]
    async fn test_token_budget_contains_context() {
        let hits: Vec<SearchChunk> = (0..6)
            .map(|i| hit(&format!("c{}", i), &"retrieval fusion ".repeat(20), 1.0 - i as f32 * 0.1))
            .collect();
        let engine = engine(registry(vec![(StrategyKind::Fulltext, Behavior::Hits(hits))]));
        let mut request = QueryRequest::new("retrieval fusion");
        request.max_tokens = Some(120);
        request.max_chunks = Some(5);

        let response = engine.retrieve(&request).await.unwrap();
        assert!(response.context_tokens <= 120);
        assert!(response.metrics.chunks_used >= 1);
        assert!(response.metrics.chunks_used < 5);
        assert_eq!(response.provenance.len(), response.metrics.chunks_used);
    }

    struct ReverseReranker {
        fail: bool,
    }

    #[async_trait]
    impl Reranker for ReverseReranker {
        async fn rerank(&self, _query: &str, documents: Vec<String>) -> Result<Vec<RerankResult>> {
            if self.fail {
                return Err(Error::Rerank("model offline".to_string()));
            }
            let n = documents.len();
            Ok((0..n)
                .map(|i| RerankResult {
                    index: i,
                    score: i as f32,
                })
                .collect())
        }

        fn model_name(&self) -> &str {
            "reverse"
        }
    }

    #[tokio::test]
    async fn test_rerank_and_degraded_rerank() {
        let hits = vec![
            hit("c1", "graphene anode", 0.9),
            hit("c2", "graphene cathode", 0.5),
        ];
        let strategies = || registry(vec![(StrategyKind::Fulltext, Behavior::Hits(hits.clone()))]);
        let mut request = QueryRequest::new("graphene");
        request.intent = Some(QueryIntent::Keyword);

        let reranked = FusionEngine::new(
            strategies(),
            Some(Arc::new(ReverseReranker { fail: false })),
            config(),
            Duration::from_millis(100),
        )
        .retrieve(&request)
        .await
        .unwrap();
        assert_eq!(reranked.provenance[0].chunk_id, "c2");
        assert_eq!(reranked.provenance[0].rerank_score, Some(1.0));
        assert!(!reranked.rerank_degraded);

        let degraded = FusionEngine::new(
            strategies(),
            Some(Arc::new(ReverseReranker { fail: true })),
            config(),
            Duration::from_millis(100),
        )
        .retrieve(&request)
        .await
        .unwrap();
        assert_eq!(degraded.provenance[0].chunk_id, "c1");
        assert!(degraded.rerank_degraded);
        assert!(!degraded.degraded);
    }

    #[tokio::test]
    async fn test_plan_falls_back_to_registered() {
        let engine = engine(registry(vec![(StrategyKind::Keyword, Behavior::Fail)]));
        assert_eq!(engine.plan(QueryIntent::Factual), vec![StrategyKind::Keyword]);
        assert_eq!(engine.plan(QueryIntent::Comparison), vec![StrategyKind::Keyword]);
    }

    #[tokio::test]
    async fn test_empty_query() {
        let engine = engine(registry(vec![(StrategyKind::Keyword, Behavior::Fail)]));
        let response = engine.retrieve(&QueryRequest::new("   ")).await.unwrap();
        assert!(response.context.is_empty());
        assert_eq!(response.metrics.strategies_invoked, 0);
    }
}
