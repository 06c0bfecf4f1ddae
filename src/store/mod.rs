//! Vector storage
//!
//! Two collections hold chunk vectors, one per [`VectorKind`]:
//! - `{prefix}_text` for text embeddings
//! - `{prefix}_visual` for cross-modal embeddings
//!
//! [`QdrantStore`] is the production backend; [`InMemoryVectorStore`] backs
//! tests and offline runs.

mod memory;
mod payload;

pub use memory::*;
pub use payload::*;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::VectorKind;
use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, Distance, Filter,
    GetCollectionInfoResponse, PointId, ScalarQuantizationBuilder, SearchPointsBuilder,
    UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::Qdrant;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Search result
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub id: String,
    pub score: f32,
    pub payload: ChunkPayload,
}

/// Payload filter applied to vector searches
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub container_ids: Vec<String>,
    pub document_ids: Vec<String>,
}

impl SearchFilter {
    /// Whether a payload passes the filter
    pub fn accepts(&self, payload: &ChunkPayload) -> bool {
        (self.container_ids.is_empty() || self.container_ids.contains(&payload.container_id))
            && (self.document_ids.is_empty() || self.document_ids.contains(&payload.document_id))
    }

    fn to_qdrant_filter(&self) -> Option<Filter> {
        let mut must_conditions: Vec<Condition> = Vec::new();

        if !self.container_ids.is_empty() {
            must_conditions.push(Condition::matches("container_id", self.container_ids.clone()));
        }

        if !self.document_ids.is_empty() {
            must_conditions.push(Condition::matches("document_id", self.document_ids.clone()));
        }

        if must_conditions.is_empty() {
            return None;
        }

        Some(Filter::must(must_conditions))
    }
}

/// Storage for one vector space
#[async_trait]
pub trait VectorStore: Send + Sync {
    fn collection(&self) -> &str;

    /// Vector length every point must have
    fn dimension(&self) -> usize;

    /// Create the collection if missing, verify its dimension otherwise
    async fn ensure_collection(&self) -> Result<()>;

    async fn upsert_points(&self, points: Vec<ChunkPoint>) -> Result<()>;

    /// Cosine search; hits scoring below `min_score` are not returned
    async fn search(
        &self,
        query_vector: Vec<f32>,
        limit: usize,
        min_score: Option<f32>,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchResult>>;

    async fn count(&self) -> Result<usize>;

    /// Delete the collection, returns whether it existed
    async fn delete_collection(&self) -> Result<bool>;
}

fn check_dimensions(collection: &str, dimension: usize, points: &[ChunkPoint]) -> Result<()> {
    if let Some(mismatch) = points.iter().find(|p| p.vector.len() != dimension) {
        return Err(Error::Schema(format!(
            "Vector dimension mismatch for collection '{}': expected {}, got {}",
            collection,
            dimension,
            mismatch.vector.len()
        )));
    }
    Ok(())
}

/// Qdrant store handle for one collection
pub struct QdrantStore {
    client: Qdrant,
    collection: String,
    dimension: usize,
}

impl QdrantStore {
    /// Connect both collections described by the configuration
    pub async fn connect_pair(
        config: &Config,
    ) -> Result<(Arc<dyn VectorStore>, Option<Arc<dyn VectorStore>>)> {
        let text = Self::new(
            &config.qdrant_url,
            &config.text_collection(),
            config.embedding.resolved_dimension(),
        )
        .await?;
        let visual = if config.visual_embedding.enabled {
            let store = Self::new(
                &config.qdrant_url,
                &config.visual_collection(),
                config.visual_embedding.resolved_dimension(),
            )
            .await?;
            Some(Arc::new(store) as Arc<dyn VectorStore>)
        } else {
            None
        };
        Ok((Arc::new(text), visual))
    }

    /// Create a new store connection directly with URL and collection name
    pub async fn new(url: &str, collection: &str, dimension: usize) -> Result<Self> {
        debug!("Connecting to Qdrant at {}", url);

        let client = Qdrant::from_url(url)
            .skip_compatibility_check()
            .build()
            .map_err(|e| Error::Qdrant(e.to_string()))?;

        Ok(Self {
            client,
            collection: collection.to_string(),
            dimension,
        })
    }

    async fn collection_vector_size(&self) -> Result<Option<u64>> {
        let info = self.client.collection_info(&self.collection).await?;
        Ok(extract_vector_size(&info))
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn ensure_collection(&self) -> Result<()> {
        if self.client.collection_exists(&self.collection).await? {
            debug!("Collection {} already exists", self.collection);

            if let Some(size) = self.collection_vector_size().await? {
                if size as usize != self.dimension {
                    return Err(Error::Schema(format!(
                        "Collection '{}' has vector size {}, but the configured model produces {}. Remediation: set a new collection prefix or reset the collections.",
                        self.collection, size, self.dimension
                    )));
                }
            }
            return Ok(());
        }

        info!(
            "Creating collection {} with dimension {}",
            self.collection, self.dimension
        );

        let vectors_config = VectorParamsBuilder::new(self.dimension as u64, Distance::Cosine);
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection)
                    .vectors_config(vectors_config)
                    .quantization_config(ScalarQuantizationBuilder::default()),
            )
            .await?;

        info!("Collection {} created successfully", self.collection);
        Ok(())
    }

    async fn upsert_points(&self, points: Vec<ChunkPoint>) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        check_dimensions(&self.collection, self.dimension, &points)?;

        debug!(
            "Upserting {} points to collection {}",
            points.len(),
            self.collection
        );

        let point_structs: Vec<_> = points.into_iter().map(|p| p.to_point_struct()).collect();
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection, point_structs).wait(true))
            .await?;
        Ok(())
    }

    async fn search(
        &self,
        query_vector: Vec<f32>,
        limit: usize,
        min_score: Option<f32>,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchResult>> {
        if query_vector.len() != self.dimension {
            return Err(Error::Schema(format!(
                "Query vector for collection '{}' has {} dimensions, expected {}",
                self.collection,
                query_vector.len(),
                self.dimension
            )));
        }

        let mut search_builder =
            SearchPointsBuilder::new(&self.collection, query_vector, limit as u64)
                .with_payload(true);
        if let Some(threshold) = min_score {
            search_builder = search_builder.score_threshold(threshold);
        }
        if let Some(qdrant_filter) = filter.to_qdrant_filter() {
            search_builder = search_builder.filter(qdrant_filter);
        }

        let response = self.client.search_points(search_builder).await?;

        let results = response
            .result
            .into_iter()
            .filter_map(|p| {
                let map = p
                    .payload
                    .into_iter()
                    .map(|(k, v)| (k, json_from_qdrant_value(v)))
                    .collect::<serde_json::Map<String, Value>>();
                ChunkPayload::from_map(map).map(|payload| SearchResult {
                    id: point_id_to_string(p.id),
                    score: p.score,
                    payload,
                })
            })
            .collect();

        Ok(results)
    }

    async fn count(&self) -> Result<usize> {
        if !self.client.collection_exists(&self.collection).await? {
            return Ok(0);
        }
        let response = self
            .client
            .count(CountPointsBuilder::new(&self.collection).exact(true))
            .await?;
        Ok(response.result.map(|r| r.count as usize).unwrap_or(0))
    }

    async fn delete_collection(&self) -> Result<bool> {
        if !self.client.collection_exists(&self.collection).await? {
            return Ok(false);
        }

        info!("Deleting collection {}", self.collection);
        self.client.delete_collection(&self.collection).await?;
        Ok(true)
    }
}

/// Vector store for a kind, from a pair of stores
pub fn store_for(
    kind: VectorKind,
    text: &Arc<dyn VectorStore>,
    visual: Option<&Arc<dyn VectorStore>>,
) -> Option<Arc<dyn VectorStore>> {
    match kind {
        VectorKind::Text => Some(text.clone()),
        VectorKind::Visual => visual.cloned(),
    }
}

fn extract_vector_size(info: &GetCollectionInfoResponse) -> Option<u64> {
    let result = info.result.as_ref()?;
    let config = result.config.as_ref()?;
    let params = config.params.as_ref()?;
    let vectors_config = params.vectors_config.as_ref()?;

    match vectors_config.config.as_ref()? {
        qdrant_client::qdrant::vectors_config::Config::Params(params) => Some(params.size),
        qdrant_client::qdrant::vectors_config::Config::ParamsMap(map) => {
            map.map.values().next().map(|p| p.size)
        }
    }
}

/// Convert PointId to string
fn point_id_to_string(id: Option<PointId>) -> String {
    match id {
        Some(PointId {
            point_id_options: Some(qdrant_client::qdrant::point_id::PointIdOptions::Uuid(uuid)),
        }) => uuid,
        Some(PointId {
            point_id_options: Some(qdrant_client::qdrant::point_id::PointIdOptions::Num(num)),
        }) => num.to_string(),
        _ => String::new(),
    }
}

/// Convert Qdrant value to serde_json Value
fn json_from_qdrant_value(v: qdrant_client::qdrant::Value) -> Value {
    use qdrant_client::qdrant::value::Kind;

    match v.kind {
        Some(Kind::NullValue(_)) => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(b),
        Some(Kind::IntegerValue(i)) => Value::Number(i.into()),
        Some(Kind::DoubleValue(d)) => serde_json::Number::from_f64(d)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Some(Kind::StringValue(s)) => Value::String(s),
        Some(Kind::ListValue(list)) => Value::Array(
            list.values
                .into_iter()
                .map(json_from_qdrant_value)
                .collect(),
        ),
        Some(Kind::StructValue(s)) => Value::Object(
            s.fields
                .into_iter()
                .map(|(k, v)| (k, json_from_qdrant_value(v)))
                .collect(),
        ),
        None => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::Modality;
    use uuid::Uuid;

    #[test]
    fn test_search_filter_to_qdrant() {
        let filter = SearchFilter {
            container_ids: vec!["patents".to_string(), "papers".to_string()],
            document_ids: vec!["doc-1".to_string()],
        };
        assert_eq!(filter.to_qdrant_filter().unwrap().must.len(), 2);
        assert!(SearchFilter::default().to_qdrant_filter().is_none());
    }

    #[test]
    fn test_search_filter_accepts() {
        let payload = ChunkPayload {
            chunk_id: "c".to_string(),
            document_id: "doc-1".to_string(),
            container_id: "patents".to_string(),
            modality: Modality::Text,
            vector_kind: VectorKind::Text,
            page_no: None,
            chunk_index: 0,
            updated_at: String::new(),
        };
        assert!(SearchFilter::default().accepts(&payload));
        let filter = SearchFilter {
            container_ids: vec!["papers".to_string()],
            document_ids: Vec::new(),
        };
        assert!(!filter.accepts(&payload));
    }

    #[tokio::test]
    async fn test_upsert_points_rejects_dimension_mismatch() {
        let store = QdrantStore::new("http://127.0.0.1:6334", "test_collection", 3)
            .await
            .expect("store should initialize");

        let point = ChunkPoint {
            id: Uuid::new_v4(),
            vector: vec![0.1, 0.2],
            payload: ChunkPayload {
                chunk_id: "c".to_string(),
                document_id: "d".to_string(),
                container_id: "k".to_string(),
                modality: Modality::Text,
                vector_kind: VectorKind::Text,
                page_no: None,
                chunk_index: 0,
                updated_at: String::new(),
            },
        };

        let err = store
            .upsert_points(vec![point])
            .await
            .expect_err("should reject mismatched vector length");
        match err {
            Error::Schema(message) => assert!(message.contains("Vector dimension mismatch")),
            other => panic!("expected schema error, got {other:?}"),
        }
    }
}
