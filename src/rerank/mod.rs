//! Reranking support for search results

mod http_backend;

pub use http_backend::*;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::is_multimodal_reranker_model;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct RerankResult {
    pub index: usize,
    pub score: f32,
}

#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(&self, query: &str, documents: Vec<String>) -> Result<Vec<RerankResult>>;
    fn model_name(&self) -> &str;
}

/// Create the configured reranker, `None` when reranking is disabled
pub fn create_reranker(config: &Config) -> Result<Option<Arc<dyn Reranker>>> {
    let reranker = &config.reranker;
    if !reranker.enabled {
        return Ok(None);
    }
    if reranker.supports_multimodal && !is_multimodal_reranker_model(&reranker.model) {
        return Err(Error::Config(format!(
            "Reranker model '{}' does not accept image inputs",
            reranker.model
        )));
    }
    Ok(Some(Arc::new(HttpReranker::new(reranker)?)))
}

/// Apply reranker output to `items`.
///
/// The result is always a permutation of the input: out-of-range and
/// repeated indices are ignored, and items the reranker did not score keep
/// their prior relative order after the scored ones.
pub fn reorder<T>(items: Vec<T>, mut results: Vec<RerankResult>) -> Vec<(T, Option<f32>)> {
    results.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));

    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    let mut seen = HashSet::new();
    let mut ordered = Vec::with_capacity(slots.len());

    for result in results {
        if !seen.insert(result.index) {
            continue;
        }
        if let Some(item) = slots.get_mut(result.index).and_then(Option::take) {
            ordered.push((item, Some(result.score)));
        }
    }
    ordered.extend(slots.into_iter().flatten().map(|item| (item, None)));
    ordered
}
