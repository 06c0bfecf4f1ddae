//! Query command implementation

use crate::error::Result;
use crate::fusion::{FusionEngine, QueryIntent, QueryRequest, RetrievalResponse};
use tracing::info;

/// Query options
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Restrict to these containers
    pub container_ids: Vec<String>,
    /// Restrict to these documents
    pub document_ids: Vec<String>,
    pub max_chunks: Option<usize>,
    pub max_tokens: Option<usize>,
    /// Base similarity threshold (0-1)
    pub similarity_threshold: Option<f32>,
    /// Skip classification and use this intent
    pub intent: Option<QueryIntent>,
}

impl QueryOptions {
    pub fn into_request(self, query: &str) -> QueryRequest {
        QueryRequest {
            query: query.to_string(),
            container_ids: self.container_ids,
            document_ids: self.document_ids,
            max_chunks: self.max_chunks,
            max_tokens: self.max_tokens,
            similarity_threshold: self.similarity_threshold,
            intent: self.intent,
        }
    }
}

/// Execute a query
pub async fn cmd_query(
    engine: &FusionEngine,
    query: &str,
    options: QueryOptions,
) -> Result<RetrievalResponse> {
    info!("Querying: {}", query);
    engine.retrieve(&options.into_request(query)).await
}

/// Print the assembled context and its sources
pub fn print_query_response(response: &RetrievalResponse) {
    if response.provenance.is_empty() {
        println!("No matching context found.");
    } else {
        println!("{}", response.context.trim_end());
        println!("\n📎 Sources ({} chunks, ~{} tokens, intent: {})", response.provenance.len(), response.context_tokens, response.intent);
        for (idx, source) in response.provenance.iter().enumerate() {
            let page = source
                .page_no
                .map(|p| format!(" p. {}", p))
                .unwrap_or_default();
            let rerank = source
                .rerank_score
                .map(|s| format!(", rerank {:.3}", s))
                .unwrap_or_default();
            println!(
                "  [{}] {}{} ({}) score {:.3}{}",
                idx + 1,
                source.document_id,
                page,
                source.modality,
                source.score,
                rerank
            );
        }
    }

    if response.degraded {
        let failed: Vec<String> = response
            .failed_strategies
            .iter()
            .map(|k| k.to_string())
            .collect();
        println!("\n⚠ Degraded: {} failed", failed.join(", "));
    }
    if response.rerank_degraded {
        println!("⚠ Reranker unavailable, fused order kept");
    }
    println!(
        "\n{} strategies, {} chunks found, {} ms",
        response.metrics.strategies_invoked,
        response.metrics.chunks_found,
        response.metrics.total_latency_ms
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_into_request() {
        let request = QueryOptions {
            container_ids: vec!["papers".to_string()],
            max_chunks: Some(3),
            intent: Some(QueryIntent::Keyword),
            ..Default::default()
        }
        .into_request("US-2020-0001");
        assert_eq!(request.query, "US-2020-0001");
        assert_eq!(request.container_ids, vec!["papers"]);
        assert_eq!(request.max_chunks, Some(3));
        assert_eq!(request.intent, Some(QueryIntent::Keyword));
        assert!(request.document_ids.is_empty());
    }
}
