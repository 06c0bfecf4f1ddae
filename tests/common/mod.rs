//! Shared fixtures for the end-to-end scenarios: deterministic model
//! backends and an application context over SQLite and in-memory vectors.

#![allow(dead_code)]

use async_trait::async_trait;
use docfuse::config::Config;
use docfuse::context::AppContext;
use docfuse::embed::{normalize_embedding, Embedder, ImageEmbedInput, MultiVectorEmbedder};
use docfuse::index::IndexStore;
use docfuse::meta::MetaDb;
use docfuse::models::DimensionRegistry;
use docfuse::store::InMemoryVectorStore;
use docfuse::Result;
use image::{DynamicImage, ImageBuffer, Luma};
use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub const TEXT_MODEL: &str = "scenario-text";
pub const TEXT_DIM: usize = 8;
pub const VISUAL_MODEL: &str = "scenario-visual";
pub const VISUAL_DIM: usize = 4;

/// Byte-histogram embedder: similar strings get similar vectors
pub struct HistogramEmbedder {
    model: String,
    dimension: usize,
}

impl HistogramEmbedder {
    pub fn new(model: &str, dimension: usize) -> Self {
        Self {
            model: model.to_string(),
            dimension,
        }
    }

    fn vector(&self, text: &str) -> Vec<f32> {
        let mut v = vec![1.0f32; self.dimension];
        for (i, b) in text.bytes().enumerate() {
            v[i % self.dimension] += b as f32;
        }
        normalize_embedding(&v)
    }
}

#[async_trait]
impl Embedder for HistogramEmbedder {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector(t)).collect())
    }

    async fn embed_images(&self, inputs: Vec<ImageEmbedInput>) -> Result<Vec<Vec<f32>>> {
        Ok(inputs.iter().map(|i| self.vector(&i.image_path)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

pub struct Scenario {
    pub ctx: AppContext,
    pub tmp: TempDir,
}

impl Scenario {
    pub async fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.init_paths(Some(tmp.path().join("home")));

        let db = MetaDb::new(&config.paths.db_file).await.unwrap();

        let mut registry = DimensionRegistry::builtin();
        registry.register(TEXT_MODEL, TEXT_DIM);
        registry.register(VISUAL_MODEL, VISUAL_DIM);
        let text: Arc<dyn Embedder> = Arc::new(HistogramEmbedder::new(TEXT_MODEL, TEXT_DIM));
        let visual: Arc<dyn Embedder> =
            Arc::new(HistogramEmbedder::new(VISUAL_MODEL, VISUAL_DIM));
        let embedder = Arc::new(MultiVectorEmbedder::new(text, Some(visual), registry, 16));

        let index = Arc::new(IndexStore::new(
            db.clone(),
            Arc::new(InMemoryVectorStore::new("scenario_text", TEXT_DIM)),
            Some(Arc::new(InMemoryVectorStore::new("scenario_visual", VISUAL_DIM))),
        ));

        let ctx = AppContext::assemble(config, db, index, embedder).unwrap();
        Self { ctx, tmp }
    }

    /// Write a file under the scenario directory
    pub fn write(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.tmp.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }
}

/// PNG bytes of a horizontal gradient
pub fn gradient_png(width: u32, height: u32) -> Vec<u8> {
    let img: ImageBuffer<Luma<u8>, Vec<u8>> =
        ImageBuffer::from_fn(width, height, |x, _| Luma([((x * 255) / width.max(1)) as u8]));
    let mut bytes = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}
