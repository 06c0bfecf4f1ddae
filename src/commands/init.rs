//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::index::IndexStore;
use crate::meta::MetaDb;
use crate::store::QdrantStore;
use serde::Serialize;
use std::path::PathBuf;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct InitOptions {
    pub base_dir: Option<PathBuf>,
    pub force: bool,
}

/// Where init put things
#[derive(Debug, Clone, Serialize)]
pub struct InitSummary {
    pub config_file: PathBuf,
    pub db_file: PathBuf,
    pub assets_dir: PathBuf,
    pub collections_ready: bool,
}

/// Write the default configuration, create the database and, when Qdrant is
/// reachable, both collections
pub async fn cmd_init(options: InitOptions) -> Result<InitSummary> {
    let config = write_initial_config(options.base_dir, options.force)?;
    let db = init_database(&config).await?;

    let collections_ready = match QdrantStore::connect_pair(&config).await {
        Ok((text, visual)) => match IndexStore::new(db, text, visual).ensure_collections().await {
            Ok(()) => {
                info!(
                    text = %config.text_collection(),
                    visual = %config.visual_collection(),
                    "Qdrant collections ready"
                );
                true
            }
            Err(e) => {
                warn!("Could not create Qdrant collections: {}. Run 'docfuse db init' later.", e);
                false
            }
        },
        Err(e) => {
            warn!(
                "Could not connect to Qdrant at {}: {}. Make sure Qdrant is running.",
                config.qdrant_url, e
            );
            false
        }
    };

    Ok(InitSummary {
        config_file: config.paths.config_file.clone(),
        db_file: config.paths.db_file.clone(),
        assets_dir: config.paths.assets_dir.clone(),
        collections_ready,
    })
}

/// Save a default config under `base_dir`. An existing config is kept
/// unless `force` is set.
pub fn write_initial_config(base_dir: Option<PathBuf>, force: bool) -> Result<Config> {
    let mut config = Config::default();
    config.init_paths(base_dir);

    if config.paths.config_file.exists() && !force {
        return Err(Error::Conflict(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config.paths.config_file.display()
        )));
    }

    config.validate()?;
    config.save()?;
    std::fs::create_dir_all(&config.paths.assets_dir)?;
    Ok(config)
}

/// Create the metadata schema
pub async fn init_database(config: &Config) -> Result<MetaDb> {
    let db = MetaDb::connect(config).await?;
    db.init_schema().await?;
    info!("Created database at {:?}", config.paths.db_file);
    Ok(db)
}

pub fn print_init_summary(summary: &InitSummary) {
    println!("✓ docfuse initialized");
    println!("  Config: {}", summary.config_file.display());
    println!("  Database: {}", summary.db_file.display());
    println!("  Assets: {}", summary.assets_dir.display());
    if !summary.collections_ready {
        println!("  ⚠ Qdrant collections not created yet (run 'docfuse db init')");
    }
    println!("\nNext steps:");
    println!("  docfuse ingest ./papers --container papers   # Ingest documents");
    println!("  docfuse query \"BERT vs GPT\"                   # Retrieve context");
}
