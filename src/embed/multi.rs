//! Multi-vector embedding of chunks.
//!
//! Every chunk gets a text vector (prose, pipe-table rendering or image
//! caption). Image chunks with a cached asset additionally get a vector in
//! the cross-modal space when a visual model is configured.

use super::{Embedder, ImageEmbedInput};
use crate::error::{Error, Result};
use crate::meta::{ChunkRecord, Modality, VectorKind};
use crate::models::DimensionRegistry;
use std::sync::Arc;
use tracing::{debug, warn};

/// What the embedder needs to know about one chunk
#[derive(Debug, Clone)]
pub struct EmbeddingInput {
    pub chunk_id: String,
    pub modality: Modality,
    pub text: String,
    pub asset_path: Option<String>,
}

impl EmbeddingInput {
    pub fn from_chunk(chunk: &ChunkRecord) -> Result<Self> {
        Ok(Self {
            chunk_id: chunk.id.clone(),
            modality: chunk.modality()?,
            text: chunk.content_text.clone(),
            asset_path: chunk.asset_path.clone(),
        })
    }

    fn wants_visual(&self) -> bool {
        self.modality == Modality::Image && self.asset_path.is_some()
    }
}

/// Vectors produced for one chunk. `missing` lists the kinds that were
/// expected but could not be produced.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingResult {
    pub chunk_id: String,
    pub text: Option<Vec<f32>>,
    pub visual: Option<Vec<f32>>,
    pub missing: Vec<VectorKind>,
}

impl EmbeddingResult {
    fn empty(chunk_id: &str) -> Self {
        Self {
            chunk_id: chunk_id.to_string(),
            text: None,
            visual: None,
            missing: Vec::new(),
        }
    }

    fn set(&mut self, kind: VectorKind, vector: Vec<f32>) {
        match kind {
            VectorKind::Text => self.text = Some(vector),
            VectorKind::Visual => self.visual = Some(vector),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

pub struct MultiVectorEmbedder {
    text: Arc<dyn Embedder>,
    visual: Option<Arc<dyn Embedder>>,
    registry: DimensionRegistry,
    batch_size: usize,
}

impl MultiVectorEmbedder {
    pub fn new(
        text: Arc<dyn Embedder>,
        visual: Option<Arc<dyn Embedder>>,
        registry: DimensionRegistry,
        batch_size: usize,
    ) -> Self {
        Self {
            text,
            visual,
            registry,
            batch_size: batch_size.max(1),
        }
    }

    pub fn registry(&self) -> &DimensionRegistry {
        &self.registry
    }

    pub fn model_for(&self, kind: VectorKind) -> Option<&str> {
        match kind {
            VectorKind::Text => Some(self.text.model_name()),
            VectorKind::Visual => self.visual.as_ref().map(|v| v.model_name()),
        }
    }

    pub fn has_visual(&self) -> bool {
        self.visual.is_some()
    }

    /// Embed a query into the text space
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        let vector = single(self.text.embed(vec![query.to_string()]).await?)?;
        self.registry.validate(self.text.model_name(), vector.len())?;
        Ok(vector)
    }

    /// Embed a query into the cross-modal space, `None` without a visual model
    pub async fn embed_query_visual(&self, query: &str) -> Result<Option<Vec<f32>>> {
        let Some(visual) = &self.visual else {
            return Ok(None);
        };
        let vector = single(visual.embed(vec![query.to_string()]).await?)?;
        self.registry.validate(visual.model_name(), vector.len())?;
        Ok(Some(vector))
    }

    /// Embed chunks in batches.
    ///
    /// A batch that fails is retried chunk by chunk so only the failing
    /// chunks are reported missing. Schema errors abort the whole call.
    pub async fn embed(&self, inputs: &[EmbeddingInput]) -> Result<Vec<EmbeddingResult>> {
        let mut results: Vec<EmbeddingResult> = inputs
            .iter()
            .map(|input| EmbeddingResult::empty(&input.chunk_id))
            .collect();

        let all: Vec<usize> = (0..inputs.len()).collect();
        self.embed_kind(self.text.as_ref(), VectorKind::Text, &all, inputs, &mut results)
            .await?;

        if let Some(visual) = &self.visual {
            let targets: Vec<usize> = inputs
                .iter()
                .enumerate()
                .filter(|(_, input)| input.wants_visual())
                .map(|(idx, _)| idx)
                .collect();
            self.embed_kind(visual.as_ref(), VectorKind::Visual, &targets, inputs, &mut results)
                .await?;
        }

        let missing = results.iter().filter(|r| !r.is_complete()).count();
        debug!(chunks = inputs.len(), missing, "Embedded chunk batch");
        Ok(results)
    }

    async fn embed_kind(
        &self,
        embedder: &dyn Embedder,
        kind: VectorKind,
        targets: &[usize],
        inputs: &[EmbeddingInput],
        results: &mut [EmbeddingResult],
    ) -> Result<()> {
        for batch in targets.chunks(self.batch_size) {
            let items: Vec<&EmbeddingInput> = batch.iter().map(|&idx| &inputs[idx]).collect();
            match self.call(embedder, kind, &items).await {
                Ok(vectors) => {
                    for (&idx, vector) in batch.iter().zip(vectors) {
                        results[idx].set(kind, vector);
                    }
                }
                Err(err @ Error::Schema(_)) => return Err(err),
                Err(err) if batch.len() == 1 => {
                    warn!(
                        chunk_id = %inputs[batch[0]].chunk_id,
                        kind = %kind,
                        "Embedding missing: {}",
                        err
                    );
                    results[batch[0]].missing.push(kind);
                }
                Err(err) => {
                    warn!(
                        kind = %kind,
                        size = batch.len(),
                        "Embedding batch failed, falling back to single chunks: {}",
                        err
                    );
                    for &idx in batch {
                        match self.call(embedder, kind, &[&inputs[idx]]).await {
                            Ok(mut vectors) => match vectors.pop() {
                                Some(vector) => results[idx].set(kind, vector),
                                None => results[idx].missing.push(kind),
                            },
                            Err(err @ Error::Schema(_)) => return Err(err),
                            Err(err) => {
                                warn!(
                                    chunk_id = %inputs[idx].chunk_id,
                                    kind = %kind,
                                    "Embedding missing: {}",
                                    err
                                );
                                results[idx].missing.push(kind);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn call(
        &self,
        embedder: &dyn Embedder,
        kind: VectorKind,
        items: &[&EmbeddingInput],
    ) -> Result<Vec<Vec<f32>>> {
        let vectors = match kind {
            VectorKind::Text => {
                embedder
                    .embed(items.iter().map(|i| i.text.clone()).collect())
                    .await?
            }
            VectorKind::Visual => {
                let images = items
                    .iter()
                    .filter_map(|i| {
                        i.asset_path.as_ref().map(|path| ImageEmbedInput {
                            image_path: path.clone(),
                            text: (!i.text.is_empty()).then(|| i.text.clone()),
                        })
                    })
                    .collect();
                embedder.embed_images(images).await?
            }
        };

        if vectors.len() != items.len() {
            return Err(Error::Embedding(format!(
                "{} embedder returned {} vectors for {} inputs",
                kind,
                vectors.len(),
                items.len()
            )));
        }
        for vector in &vectors {
            self.registry.validate(embedder.model_name(), vector.len())?;
        }
        Ok(vectors)
    }
}

fn single(mut vectors: Vec<Vec<f32>>) -> Result<Vec<f32>> {
    match (vectors.pop(), vectors.is_empty()) {
        (Some(vector), true) => Ok(vector),
        _ => Err(Error::Embedding(
            "Expected exactly one query embedding".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::tests::FakeEmbedder;
    use std::sync::atomic::Ordering;

    fn registry() -> DimensionRegistry {
        let mut registry = DimensionRegistry::builtin();
        registry.register("fake-text", 8);
        registry.register("fake-visual", 4);
        registry
    }

    fn input(id: &str, modality: Modality, text: &str, asset: Option<&str>) -> EmbeddingInput {
        EmbeddingInput {
            chunk_id: id.to_string(),
            modality,
            text: text.to_string(),
            asset_path: asset.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_text_and_visual_vectors() {
        let embedder = MultiVectorEmbedder::new(
            Arc::new(FakeEmbedder::new("fake-text", 8)),
            Some(Arc::new(FakeEmbedder::new("fake-visual", 4).with_images())),
            registry(),
            16,
        );
        let inputs = vec![
            input("t1", Modality::Text, "attention is all you need", None),
            input("tb", Modality::Table, "| a | b |", None),
            input("im", Modality::Image, "loss curve", Some("/assets/abc.png")),
        ];

        let results = embedder.embed(&inputs).await.unwrap();
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.is_complete() && r.text.is_some()));
        assert!(results[0].visual.is_none());
        assert!(results[1].visual.is_none());
        assert_eq!(results[2].visual.as_ref().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_failed_batch_falls_back_per_chunk() {
        let text = Arc::new(FakeEmbedder::new("fake-text", 8).poisoned("BROKEN"));
        let embedder = MultiVectorEmbedder::new(text.clone(), None, registry(), 3);
        let inputs = vec![
            input("a", Modality::Text, "fine", None),
            input("b", Modality::Text, "BROKEN chunk", None),
            input("c", Modality::Text, "also fine", None),
        ];

        let results = embedder.embed(&inputs).await.unwrap();
        assert!(results[0].text.is_some());
        assert_eq!(results[1].missing, vec![VectorKind::Text]);
        assert!(results[2].text.is_some());
        // One batch call plus three single-chunk calls
        assert_eq!(text.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_aborts() {
        let mut registry = registry();
        registry.register("fake-text", 16);
        let embedder =
            MultiVectorEmbedder::new(Arc::new(FakeEmbedder::new("fake-text", 8)), None, registry, 4);

        let result = embedder
            .embed(&[input("a", Modality::Text, "text", None)])
            .await;
        assert!(matches!(result, Err(Error::Schema(_))));
    }

    #[tokio::test]
    async fn test_query_embeddings() {
        let embedder = MultiVectorEmbedder::new(
            Arc::new(FakeEmbedder::new("fake-text", 8)),
            None,
            registry(),
            4,
        );
        assert_eq!(embedder.embed_query("bert").await.unwrap().len(), 8);
        assert!(embedder.embed_query_visual("bert").await.unwrap().is_none());
        assert_eq!(embedder.model_for(VectorKind::Visual), None);
    }
}
