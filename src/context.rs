//! Wiring of the long-lived components shared by the commands

use crate::config::Config;
use crate::embed::{create_embedder, create_visual_embedder, MultiVectorEmbedder};
use crate::error::{Error, Result};
use crate::extract::create_extractor;
use crate::fusion::{FusionEngine, StrategyRegistry};
use crate::index::IndexStore;
use crate::ingest::IngestPipeline;
use crate::meta::MetaDb;
use crate::models::DimensionRegistry;
use crate::rerank::create_reranker;
use crate::store::QdrantStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct AppContext {
    pub config: Config,
    pub db: MetaDb,
    pub index: Arc<IndexStore>,
    pub embedder: Arc<MultiVectorEmbedder>,
    pub engine: FusionEngine,
    pub pipeline: Arc<IngestPipeline>,
}

impl AppContext {
    /// Connect to the metadata database and both vector collections and
    /// build the engine and pipeline on top of them
    pub async fn build(config: Config) -> Result<Self> {
        config.validate()?;

        let db = MetaDb::connect(&config).await?;
        if !db.is_initialized().await? {
            return Err(Error::NotInitialized);
        }

        let (text_store, visual_store) = QdrantStore::connect_pair(&config).await?;
        let index = Arc::new(IndexStore::new(db.clone(), text_store, visual_store));

        let embedder = Arc::new(MultiVectorEmbedder::new(
            create_embedder(&config)?,
            create_visual_embedder(&config)?,
            DimensionRegistry::for_config(&config),
            config.embedding.batch_size,
        ));

        Self::assemble(config, db, index, embedder)
    }

    /// Build the engine and pipeline over already-connected stores
    pub fn assemble(
        config: Config,
        db: MetaDb,
        index: Arc<IndexStore>,
        embedder: Arc<MultiVectorEmbedder>,
    ) -> Result<Self> {
        let registry = StrategyRegistry::standard(index.clone(), embedder.clone(), &config.retrieval);
        debug!(strategies = ?registry.kinds(), "Registered retrieval strategies");

        let engine = FusionEngine::new(
            registry,
            create_reranker(&config)?,
            config.retrieval.clone(),
            Duration::from_millis(config.reranker.timeout_ms),
        )
        .with_screening(config.retrieval.screening);

        let pipeline = Arc::new(IngestPipeline::new(
            &config,
            db.clone(),
            index.clone(),
            create_extractor(&config)?,
            embedder.clone(),
        ));

        Ok(Self {
            config,
            db,
            index,
            embedder,
            engine,
            pipeline,
        })
    }
}
