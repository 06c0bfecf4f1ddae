//! Status and database administration commands

use crate::config::Config;
use crate::error::Result;
use crate::index::IndexStore;
use crate::meta::{GlobalStats, MetaDb};
use crate::store::{QdrantStore, VectorStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionStatus {
    pub name: String,
    pub points: usize,
}

/// Status information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusInfo {
    pub config_path: String,
    pub db_path: String,
    pub qdrant_url: String,
    pub qdrant_connected: bool,
    pub collections: Vec<CollectionStatus>,
    pub text_model: String,
    pub visual_model: Option<String>,
    pub reranker_model: Option<String>,
    pub db_stats: GlobalStats,
}

async fn connect_index(config: &Config, db: &MetaDb) -> Result<IndexStore> {
    let (text, visual) = QdrantStore::connect_pair(config).await?;
    Ok(IndexStore::new(db.clone(), text, visual))
}

/// Get system status. An unreachable Qdrant is reported, not raised.
pub async fn cmd_status(config: &Config, db: &MetaDb) -> Result<StatusInfo> {
    info!("Getting status");

    let db_stats = db.get_global_stats().await?;

    let counts = match connect_index(config, db).await {
        Ok(index) => index.collection_counts().await,
        Err(e) => Err(e),
    };
    let (qdrant_connected, collections) = match counts {
        Ok(counts) => (
            true,
            counts
                .into_iter()
                .map(|(name, points)| CollectionStatus { name, points })
                .collect(),
        ),
        Err(e) => {
            debug!("Qdrant unavailable: {:?}", e);
            (false, Vec::new())
        }
    };

    Ok(StatusInfo {
        config_path: config.paths.config_file.display().to_string(),
        db_path: config.paths.db_file.display().to_string(),
        qdrant_url: config.qdrant_url.clone(),
        qdrant_connected,
        collections,
        text_model: config.embedding.model.clone(),
        visual_model: config
            .visual_embedding
            .enabled
            .then(|| config.visual_embedding.model.clone()),
        reranker_model: config
            .reranker
            .enabled
            .then(|| config.reranker.model.clone()),
        db_stats,
    })
}

/// Print status to console
pub fn print_status(status: &StatusInfo) {
    println!("\n📊 docfuse Status\n");
    println!("Configuration: {}", status.config_path);
    println!("Database: {}", status.db_path);
    println!("\nQdrant:");
    println!("  URL: {}", status.qdrant_url);
    if status.qdrant_connected {
        println!("  Status: ✓ Connected");
        for collection in &status.collections {
            println!("  {}: {} points", collection.name, collection.points);
        }
    } else {
        println!("  Status: ✗ Not connected");
    }

    println!("\nModels:");
    println!("  Text embedding: {}", status.text_model);
    println!(
        "  Visual embedding: {}",
        status.visual_model.as_deref().unwrap_or("disabled")
    );
    println!(
        "  Reranker: {}",
        status.reranker_model.as_deref().unwrap_or("disabled")
    );

    let stats = &status.db_stats;
    println!("\nDatabase Stats:");
    println!("  Documents: {} ({} failed)", stats.document_count, stats.failed_documents);
    println!("  Running sessions: {}", stats.running_sessions);
    println!("  Visible chunks: {}", stats.visible_chunks);
    println!(
        "  Embeddings: {} text, {} visual",
        stats.text_embeddings, stats.visual_embeddings
    );
    println!("  Near-duplicate images: {}", stats.duplicate_images);
}

/// Create the schema and both collections
pub async fn cmd_db_init(config: &Config) -> Result<Vec<CollectionStatus>> {
    let db = MetaDb::connect(config).await?;
    db.init_schema().await?;
    let index = connect_index(config, &db).await?;
    index.ensure_collections().await?;
    collection_status(&index).await
}

/// Drop all metadata and vectors, then recreate empty stores
pub async fn cmd_db_reset(config: &Config) -> Result<Vec<CollectionStatus>> {
    let db = MetaDb::connect(config).await?;
    let (text, visual) = QdrantStore::connect_pair(config).await?;

    for store in std::iter::once(&text).chain(visual.as_ref()) {
        if store.delete_collection().await? {
            info!(collection = %store.collection(), "Deleted collection");
        }
    }
    db.reset().await?;

    let index = IndexStore::new(db, text, visual);
    index.ensure_collections().await?;
    collection_status(&index).await
}

async fn collection_status(index: &IndexStore) -> Result<Vec<CollectionStatus>> {
    Ok(index
        .collection_counts()
        .await?
        .into_iter()
        .map(|(name, points)| CollectionStatus { name, points })
        .collect())
}

pub fn print_collections(collections: &[CollectionStatus]) {
    for collection in collections {
        println!("  {}: {} points", collection.name, collection.points);
    }
}
