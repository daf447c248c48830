//! Error types for the ingestion crate.

use series_common::SeriesError;
use storage::StagingError;
use thiserror::Error;

/// Errors that can occur during assimilation.
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Invalid request: {0}")]
    Config(#[from] SeriesError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Raster processing failed: {0}")]
    Grid(#[from] grid_processor::GridProcessorError),

    #[error("Staging cache error: {0}")]
    Staging(#[from] StagingError),

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("Failed to encode output: {0}")]
    Encode(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Run cancelled")]
    Cancelled,
}

impl IngestionError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    pub fn encode(msg: impl std::fmt::Display) -> Self {
        Self::Encode(msg.to_string())
    }
}

/// Errors from remote archives. Recovered by falling back to the next
/// mirror, then the next dataset.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication rejected by {url} (HTTP {status})")]
    Auth { url: String, status: u16 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("download cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<StagingError> for FetchError {
    fn from(err: StagingError) -> Self {
        match err {
            StagingError::Cancelled => Self::Cancelled,
            StagingError::Io(e) => Self::Io(e),
            other => Self::Io(std::io::Error::new(std::io::ErrorKind::Other, other.to_string())),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;
