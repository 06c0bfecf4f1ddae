//! Embedding generation
//!
//! This module provides an abstraction over embedding models with:
//! - A trait for different embedding backends
//! - HTTP embedding backend (text and cross-modal image+text)
//! - Optional in-process FastEmbed text backend (`local-embed` feature)
//! - The multi-vector embedder used by ingestion

#[cfg(feature = "local-embed")]
mod fastembed_impl;
mod http_backend;
mod multi;

#[cfg(feature = "local-embed")]
pub use fastembed_impl::*;
pub use http_backend::*;
pub use multi::*;

use crate::backend::RetryPolicy;
use crate::config::Config;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ImageEmbedInput {
    pub image_path: String,
    pub text: Option<String>,
}

/// Scale a vector to unit length; zero vectors are returned unchanged
pub fn normalize_embedding(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return vector.to_vec();
    }
    vector.iter().map(|v| v / norm).collect()
}

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;

    /// Embed a batch of images with optional caption text (cross-modal models)
    async fn embed_images(&self, _inputs: Vec<ImageEmbedInput>) -> Result<Vec<Vec<f32>>> {
        Err(Error::Embedding(
            "Image embedding is not supported by this backend".to_string(),
        ))
    }

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

fn retry_policy(config: &Config) -> RetryPolicy {
    RetryPolicy::new(config.ingest.embed_retries, config.ingest.retry_backoff_ms)
}

/// Create the text embedder based on configuration
pub fn create_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    match config.embedding.provider.as_str() {
        "http" => Ok(Arc::new(HttpEmbedder::new(
            config.embedding.backend_url.as_str(),
            &config.embedding.model,
            config.embedding.resolved_dimension(),
            Duration::from_secs(config.embedding.timeout_secs),
            retry_policy(config),
        )?)),
        #[cfg(feature = "local-embed")]
        "local" => Ok(Arc::new(FastEmbedder::new(&config.embedding)?)),
        other => Err(Error::Config(format!(
            "Embedding provider '{}' is not available in this build",
            other
        ))),
    }
}

/// Create the cross-modal embedder, `None` when visual embedding is disabled
pub fn create_visual_embedder(config: &Config) -> Result<Option<Arc<dyn Embedder>>> {
    if !config.visual_embedding.enabled {
        return Ok(None);
    }
    let embedder = HttpEmbedder::new(
        config.visual_embedding.backend_url(&config.embedding),
        &config.visual_embedding.model,
        config.visual_embedding.resolved_dimension(),
        Duration::from_secs(config.embedding.timeout_secs),
        retry_policy(config),
    )?;
    Ok(Some(Arc::new(embedder)))
}
