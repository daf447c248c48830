//! Error types for the staging cache.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StagingError {
    /// A staged file no longer matches its manifest.
    #[error("corrupt staging entry {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// The key cannot be mapped to a file name.
    #[error("invalid cache key: {0}")]
    InvalidKey(String),

    #[error("staging I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("staging manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("fetch cancelled")]
    Cancelled,
}

impl StagingError {
    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type StagingResult<T> = std::result::Result<T, StagingError>;
