//! Model registry: capabilities and expected output dimensions.
//!
//! Every vector written to the index is checked against
//! [`DimensionRegistry::expected_dimension`] before it is persisted.

use crate::config::Config;
use crate::error::{Error, Result};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultimodalStrategy {
    /// Vision-language embedding model that jointly encodes text + image inputs.
    VlEmbedding,
    /// Dual-encoder model that embeds images and captions into one space.
    DualEncoder,
}

#[derive(Debug, Clone, Copy)]
pub struct EmbeddingModelCapabilities {
    pub strategy: MultimodalStrategy,
    pub supports_text: bool,
    pub supports_image: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RerankerModelCapabilities {
    pub supports_text: bool,
    pub supports_image: bool,
}

const QWEN3_VL_EMBEDDING_2B: &str = "Qwen/Qwen3-VL-Embedding-2B";
const QWEN3_VL_RERANKER_2B: &str = "Qwen/Qwen3-VL-Reranker-2B";
const JINA_CLIP_V2: &str = "jinaai/jina-clip-v2";
const JINA_RERANKER_M0: &str = "jinaai/jina-reranker-m0";
const CLIP_VIT_B32: &str = "openai/clip-vit-base-patch32";

fn is_siglip2(model: &str) -> bool {
    model.starts_with("google/siglip2-")
}

/// Known output dimensions, keyed by model name.
const BUILTIN_DIMENSIONS: &[(&str, usize)] = &[
    ("BAAI/bge-small-en-v1.5", 384),
    ("BAAI/bge-base-en-v1.5", 768),
    ("BAAI/bge-large-en-v1.5", 1024),
    ("BAAI/bge-m3", 1024),
    ("sentence-transformers/all-MiniLM-L6-v2", 384),
    ("intfloat/multilingual-e5-large", 1024),
    (JINA_CLIP_V2, 1024),
    (CLIP_VIT_B32, 512),
    ("google/siglip2-base-patch16-224", 768),
    (QWEN3_VL_EMBEDDING_2B, 2048),
];

pub fn embedding_model_capabilities(model: &str) -> Option<EmbeddingModelCapabilities> {
    match model {
        QWEN3_VL_EMBEDDING_2B => Some(EmbeddingModelCapabilities {
            strategy: MultimodalStrategy::VlEmbedding,
            supports_text: true,
            supports_image: true,
        }),
        JINA_CLIP_V2 | CLIP_VIT_B32 => Some(EmbeddingModelCapabilities {
            strategy: MultimodalStrategy::DualEncoder,
            supports_text: true,
            supports_image: true,
        }),
        _ if is_siglip2(model) => Some(EmbeddingModelCapabilities {
            strategy: MultimodalStrategy::DualEncoder,
            supports_text: true,
            supports_image: true,
        }),
        _ => None,
    }
}

pub fn reranker_model_capabilities(model: &str) -> Option<RerankerModelCapabilities> {
    match model {
        QWEN3_VL_RERANKER_2B | JINA_RERANKER_M0 => Some(RerankerModelCapabilities {
            supports_text: true,
            supports_image: true,
        }),
        _ => None,
    }
}

pub fn is_multimodal_reranker_model(model: &str) -> bool {
    reranker_model_capabilities(model).is_some()
}

/// Built-in dimension for a model name, if known.
pub fn embedding_dimension_for_model(model: &str) -> Option<usize> {
    BUILTIN_DIMENSIONS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|(_, dim)| *dim)
}

/// Expected output dimension per model.
///
/// Seeded from the built-in table and extended with the models the
/// configuration declares, so custom backends can be used without code
/// changes.
#[derive(Debug, Clone, Default)]
pub struct DimensionRegistry {
    dims: HashMap<String, usize>,
}

impl DimensionRegistry {
    pub fn builtin() -> Self {
        let dims = BUILTIN_DIMENSIONS
            .iter()
            .map(|(name, dim)| (name.to_string(), *dim))
            .collect();
        Self { dims }
    }

    /// Built-in table plus the text and visual models named in `config`
    pub fn for_config(config: &Config) -> Self {
        let mut registry = Self::builtin();
        registry.register(
            config.embedding.model.clone(),
            config.embedding.resolved_dimension(),
        );
        if config.visual_embedding.enabled {
            registry.register(
                config.visual_embedding.model.clone(),
                config.visual_embedding.resolved_dimension(),
            );
        }
        registry
    }

    /// Register (or override) a model's dimension.
    pub fn register(&mut self, model: impl Into<String>, dimension: usize) {
        self.dims.insert(model.into(), dimension);
    }

    pub fn expected_dimension(&self, model: &str) -> Result<usize> {
        self.dims
            .get(model)
            .copied()
            .ok_or_else(|| Error::Schema(format!("unknown embedding model '{}'", model)))
    }

    /// Fail with a schema error unless `actual` matches the model's dimension.
    pub fn validate(&self, model: &str, actual: usize) -> Result<()> {
        let expected = self.expected_dimension(model)?;
        if expected != actual {
            return Err(Error::Schema(format!(
                "model '{}' produced {} dimensions, expected {}",
                model, actual, expected
            )));
        }
        Ok(())
    }
}
