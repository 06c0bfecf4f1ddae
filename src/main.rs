//! docfuse CLI entry point

use clap::{Parser, Subcommand};
use docfuse::{
    commands::{
        cmd_db_init, cmd_db_reset, cmd_duplicates, cmd_ingest, cmd_init, cmd_query, cmd_screen,
        cmd_sessions, cmd_status, print_collections, print_duplicates, print_ingest_summary,
        print_init_summary, print_query_response, print_screen_report, print_sessions,
        print_status, IngestOptions, InitOptions, QueryOptions, ScreenOptions,
    },
    config::Config,
    context::AppContext,
    error::{Error, Result},
    fusion::QueryIntent,
    meta::MetaDb,
    progress::LogWriterFactory,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docfuse")]
#[command(version, about = "Multimodal document ingestion and hybrid retrieval fusion", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, env = "DOCFUSE_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize docfuse configuration, database and collections
    Init {
        /// Base directory (defaults to ~/.docfuse)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Ingest a file or every file in a directory
    Ingest {
        /// File or directory to ingest
        path: PathBuf,

        /// Container (collection of documents) to ingest into
        #[arg(long, default_value = "default")]
        container: String,

        /// Re-ingest into an existing document (single file only)
        #[arg(long)]
        document_id: Option<String>,

        /// Declared document type (inferred from the extension otherwise)
        #[arg(long)]
        document_type: Option<String>,

        /// Document title
        #[arg(long)]
        title: Option<String>,
    },

    /// Retrieve a fused, token-bounded context for a query
    Query {
        /// The search query
        query: String,

        /// Restrict to container IDs
        #[arg(long)]
        container: Vec<String>,

        /// Restrict to document IDs
        #[arg(long)]
        document: Vec<String>,

        /// Maximum chunks in the context
        #[arg(long)]
        max_chunks: Option<usize>,

        /// Token budget for the context
        #[arg(long)]
        max_tokens: Option<usize>,

        /// Base vector similarity threshold (0-1)
        #[arg(long)]
        threshold: Option<f32>,

        /// Skip intent classification (factual, comparison, keyword, exploratory)
        #[arg(long)]
        intent: Option<String>,
    },

    /// Show system status
    Status,

    /// Show the extraction and chunk sessions of a document
    Sessions {
        document_id: String,
    },

    /// List near-duplicate images flagged for a document
    Duplicates {
        document_id: String,
    },

    /// Screen a JSON list of prior-art candidates against keywords
    Screen {
        /// JSON array of {id, title, abstract, publication_date, score}
        file: PathBuf,

        /// Target keywords
        #[arg(short, long, value_delimiter = ',')]
        keywords: Vec<String>,

        /// Minimum keyword relevance
        #[arg(long)]
        min_relevance: Option<f32>,

        /// Maximum results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Manage the metadata database and vector collections
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
}

#[derive(Subcommand)]
enum DbAction {
    /// Create the schema and both collections
    Init,

    /// Show collection and database status
    Status,

    /// Delete all metadata and vectors, then recreate empty stores
    Reset {
        /// Skip confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory))
        .with(filter)
        .init();

    let json = cli.json;

    let command = match cli.command {
        Commands::Init { dir, force } => {
            let summary = cmd_init(InitOptions { base_dir: dir, force }).await?;
            return emit(json, &summary, print_init_summary);
        }
        Commands::Screen {
            file,
            keywords,
            min_relevance,
            limit,
        } => {
            let options = ScreenOptions {
                keywords,
                min_relevance,
                limit,
            };
            let report = cmd_screen(&file, options).await?;
            return emit(json, &report, print_screen_report);
        }
        command => command,
    };

    let config = load_config(cli.config)?;

    match command {
        Commands::Init { .. } | Commands::Screen { .. } => {}

        Commands::Ingest {
            path,
            container,
            document_id,
            document_type,
            title,
        } => {
            let ctx = AppContext::build(config).await?;
            let options = IngestOptions {
                path,
                container_id: container,
                document_id,
                document_type,
                title,
                quiet: json,
            };
            let summary = cmd_ingest(&ctx, options).await?;
            emit(json, &summary, print_ingest_summary)?;
        }

        Commands::Query {
            query,
            container,
            document,
            max_chunks,
            max_tokens,
            threshold,
            intent,
        } => {
            let ctx = AppContext::build(config).await?;
            let options = QueryOptions {
                container_ids: container,
                document_ids: document,
                max_chunks,
                max_tokens,
                similarity_threshold: threshold,
                intent: intent.map(|i| i.parse::<QueryIntent>()).transpose()?,
            };
            let response = cmd_query(&ctx.engine, &query, options).await?;
            emit(json, &response, print_query_response)?;
        }

        Commands::Status | Commands::Db { action: DbAction::Status } => {
            let db = open_db(&config).await?;
            let status = cmd_status(&config, &db).await?;
            emit(json, &status, print_status)?;
        }

        Commands::Sessions { document_id } => {
            let db = open_db(&config).await?;
            let history = cmd_sessions(&db, &document_id).await?;
            emit(json, &history, print_sessions)?;
        }

        Commands::Duplicates { document_id } => {
            let db = open_db(&config).await?;
            let duplicates = cmd_duplicates(&db, &document_id).await?;
            emit(json, &duplicates, |d| print_duplicates(&document_id, d))?;
        }

        Commands::Db { action: DbAction::Init } => {
            let collections = cmd_db_init(&config).await?;
            emit(json, &collections, |c| {
                println!("✓ Database and collections initialized");
                print_collections(c);
            })?;
        }

        Commands::Db {
            action: DbAction::Reset { yes },
        } => {
            if !yes {
                return Err(Error::Config(
                    "This deletes ALL documents, chunks and vectors. Run with --yes to confirm."
                        .to_string(),
                ));
            }
            let collections = cmd_db_reset(&config).await?;
            emit(json, &collections, |c| {
                println!("✓ Database and collections reset");
                print_collections(c);
            })?;
        }
    }

    Ok(())
}

/// Print as pretty JSON or through the human-readable printer
fn emit<T: Serialize + ?Sized>(json: bool, value: &T, print: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print(value);
    }
    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<Config> {
    let config_path = path.unwrap_or_else(Config::default_config_path);
    if !config_path.exists() {
        return Err(Error::NotInitialized);
    }
    Config::load(&config_path)
}

async fn open_db(config: &Config) -> Result<MetaDb> {
    let db = MetaDb::connect(config).await?;
    if !db.is_initialized().await? {
        return Err(Error::NotInitialized);
    }
    Ok(db)
}
