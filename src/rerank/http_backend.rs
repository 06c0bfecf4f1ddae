use super::{RerankResult, Reranker};
use crate::backend::{BackendClient, RetryPolicy};
use crate::config::RerankerConfig;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RerankResponse {
    results: Vec<RerankItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct RerankItem {
    index: usize,
    #[serde(alias = "relevance_score")]
    score: f32,
}

pub struct HttpReranker {
    client: BackendClient,
    model_id: String,
}

impl HttpReranker {
    /// Rerank calls run under their own deadline, so they are not retried
    pub fn new(config: &RerankerConfig) -> Result<Self> {
        Ok(Self {
            client: BackendClient::new(
                &config.backend_url,
                Duration::from_millis(config.timeout_ms),
                RetryPolicy::none(),
                "reranker",
            )?,
            model_id: config.model.clone(),
        })
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    async fn rerank(&self, query: &str, documents: Vec<String>) -> Result<Vec<RerankResult>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let request = RerankRequest {
            model: &self.model_id,
            query,
            documents,
        };
        let parsed: RerankResponse = self.client.post_json("/v1/rerank", &request).await?;
        Ok(parsed
            .results
            .into_iter()
            .map(|item| RerankResult {
                index: item.index,
                score: item.score,
            })
            .collect())
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_rerank_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/rerank"))
            .and(body_partial_json(json!({ "query": "bert", "documents": ["a", "b"] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{ "index": 1, "relevance_score": 0.9 }, { "index": 0, "score": 0.2 }]
            })))
            .mount(&server)
            .await;

        let config = RerankerConfig {
            enabled: true,
            backend_url: server.uri(),
            ..RerankerConfig::default()
        };
        let results = HttpReranker::new(&config)
            .unwrap()
            .rerank("bert", vec!["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].index, 1);
        assert!((results[0].score - 0.9).abs() < 1e-6);
    }
}
