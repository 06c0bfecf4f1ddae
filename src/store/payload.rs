//! Payload schema for Qdrant points

use crate::meta::{Modality, VectorKind};
use qdrant_client::qdrant::{PointStruct, Value as QdrantValue};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// A point ready to be upserted to Qdrant
#[derive(Debug, Clone)]
pub struct ChunkPoint {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: ChunkPayload,
}

impl ChunkPoint {
    /// Convert to qdrant-client PointStruct
    pub fn to_point_struct(self) -> PointStruct {
        let payload_map = self.payload.to_qdrant_payload();
        PointStruct::new(self.id.to_string(), self.vector, payload_map)
    }
}

/// Payload stored with each chunk vector in Qdrant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkPayload {
    pub chunk_id: String,

    pub document_id: String,

    pub container_id: String,

    pub modality: Modality,

    /// Which collection the point lives in
    pub vector_kind: VectorKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_no: Option<i64>,

    /// Chunk index within its chunk session
    #[serde(default)]
    pub chunk_index: i64,

    #[serde(default)]
    pub updated_at: String,
}

impl ChunkPayload {
    /// Convert to Qdrant payload format
    pub fn to_qdrant_payload(self) -> HashMap<String, QdrantValue> {
        let mut map = HashMap::new();

        map.insert("chunk_id".to_string(), string_to_qdrant(&self.chunk_id));
        map.insert("document_id".to_string(), string_to_qdrant(&self.document_id));
        map.insert("container_id".to_string(), string_to_qdrant(&self.container_id));
        map.insert("modality".to_string(), string_to_qdrant(&self.modality.to_string()));
        map.insert(
            "vector_kind".to_string(),
            string_to_qdrant(&self.vector_kind.to_string()),
        );
        map.insert("chunk_index".to_string(), int_to_qdrant(self.chunk_index));
        map.insert("updated_at".to_string(), string_to_qdrant(&self.updated_at));

        if let Some(page_no) = self.page_no {
            map.insert("page_no".to_string(), int_to_qdrant(page_no));
        }

        map
    }

    /// Parse a payload read back from Qdrant; `None` for foreign points
    pub fn from_map(map: Map<String, Value>) -> Option<Self> {
        serde_json::from_value(Value::Object(map)).ok()
    }
}

fn string_to_qdrant(s: &str) -> QdrantValue {
    QdrantValue {
        kind: Some(qdrant_client::qdrant::value::Kind::StringValue(s.to_string())),
    }
}

fn int_to_qdrant(i: i64) -> QdrantValue {
    QdrantValue {
        kind: Some(qdrant_client::qdrant::value::Kind::IntegerValue(i)),
    }
}
