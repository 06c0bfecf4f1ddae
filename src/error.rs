//! Custom error types for docfuse

use thiserror::Error;

/// Main error type for docfuse operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Dependency not satisfied: {0}")]
    Dependency(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("Illegal state transition: {0}")]
    State(String),

    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Qdrant error: {0}")]
    Qdrant(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Rerank error: {0}")]
    Rerank(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Ingestion queue is full ({0} jobs in flight)")]
    QueueFull(usize),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Not initialized: run 'docfuse init' first")]
    NotInitialized,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether retrying the failed call may succeed.
    ///
    /// Transport failures, timeouts and backend-side errors are transient.
    /// Validation and state errors never are.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status().map(|s| s.is_server_error() || s.as_u16() == 429).unwrap_or(false)
            }
            Error::Embedding(_) | Error::Rerank(_) | Error::Qdrant(_) | Error::Timeout(_) => true,
            _ => false,
        }
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}

/// Result type alias for docfuse
pub type Result<T> = std::result::Result<T, Error>;

/// Convert qdrant errors
impl From<qdrant_client::QdrantError> for Error {
    fn from(err: qdrant_client::QdrantError) -> Self {
        Error::Qdrant(err.to_string())
    }
}
