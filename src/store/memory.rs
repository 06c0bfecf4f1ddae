use super::{check_dimensions, ChunkPoint, SearchFilter, SearchResult, VectorStore};
use crate::embed::normalize_embedding;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Brute-force cosine store kept in process memory
pub struct InMemoryVectorStore {
    collection: String,
    dimension: usize,
    points: RwLock<HashMap<String, ChunkPoint>>,
}

impl InMemoryVectorStore {
    pub fn new(collection: &str, dimension: usize) -> Self {
        Self {
            collection: collection.to_string(),
            dimension,
            points: RwLock::new(HashMap::new()),
        }
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let a = normalize_embedding(a);
    let b = normalize_embedding(b);
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn ensure_collection(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_points(&self, points: Vec<ChunkPoint>) -> Result<()> {
        check_dimensions(&self.collection, self.dimension, &points)?;
        let mut stored = self.points.write().await;
        for point in points {
            stored.insert(point.id.to_string(), point);
        }
        Ok(())
    }

    async fn search(
        &self,
        query_vector: Vec<f32>,
        limit: usize,
        min_score: Option<f32>,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchResult>> {
        let stored = self.points.read().await;
        let mut results: Vec<SearchResult> = stored
            .iter()
            .filter(|(_, point)| filter.accepts(&point.payload))
            .map(|(id, point)| SearchResult {
                id: id.clone(),
                score: cosine(&query_vector, &point.vector),
                payload: point.payload.clone(),
            })
            .filter(|result| min_score.map_or(true, |min| result.score >= min))
            .collect();

        results.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        results.truncate(limit);
        Ok(results)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.points.read().await.len())
    }

    async fn delete_collection(&self) -> Result<bool> {
        let mut stored = self.points.write().await;
        let existed = !stored.is_empty();
        stored.clear();
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::meta::{Modality, VectorKind};
    use crate::store::ChunkPayload;
    use uuid::Uuid;

    fn point(document_id: &str, vector: Vec<f32>) -> ChunkPoint {
        ChunkPoint {
            id: Uuid::new_v4(),
            vector,
            payload: ChunkPayload {
                chunk_id: Uuid::new_v4().to_string(),
                document_id: document_id.to_string(),
                container_id: "papers".to_string(),
                modality: Modality::Text,
                vector_kind: VectorKind::Text,
                page_no: Some(1),
                chunk_index: 0,
                updated_at: String::new(),
            },
        }
    }

    #[tokio::test]
    async fn test_search_ranks_by_cosine() {
        let store = InMemoryVectorStore::new("test_text", 2);
        store
            .upsert_points(vec![
                point("near", vec![1.0, 0.1]),
                point("far", vec![0.0, 1.0]),
                point("opposite", vec![-1.0, 0.0]),
            ])
            .await
            .unwrap();

        let results = store
            .search(vec![1.0, 0.0], 10, Some(0.0), &SearchFilter::default())
            .await
            .unwrap();
        let docs: Vec<&str> = results.iter().map(|r| r.payload.document_id.as_str()).collect();
        assert_eq!(docs, vec!["near", "far"]);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_filter_and_dimension_check() {
        let store = InMemoryVectorStore::new("test_text", 2);
        store
            .upsert_points(vec![point("a", vec![1.0, 0.0]), point("b", vec![1.0, 0.0])])
            .await
            .unwrap();

        let filter = SearchFilter {
            container_ids: Vec::new(),
            document_ids: vec!["b".to_string()],
        };
        let results = store.search(vec![1.0, 0.0], 10, None, &filter).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].payload.document_id, "b");

        let err = store.upsert_points(vec![point("c", vec![1.0])]).await;
        assert!(matches!(err, Err(Error::Schema(_))));
    }
}
