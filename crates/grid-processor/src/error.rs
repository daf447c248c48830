//! Error types for grid processing.

use thiserror::Error;

/// Errors that can occur during grid processing.
#[derive(Error, Debug)]
pub enum GridProcessorError {
    /// The raster and the requested area share no cells.
    #[error("raster {raster} does not overlap area {area}")]
    NoOverlap { raster: String, area: String },

    /// Scenes to be merged do not share a pixel grid.
    #[error("incompatible grids: {0}")]
    IncompatibleGrids(String),

    /// Raster data does not match its declared geometry.
    #[error("invalid raster: {0}")]
    InvalidRaster(String),

    /// Failed to read or decode a raster.
    #[error("failed to read raster: {0}")]
    ReadFailed(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl GridProcessorError {
    /// Create a NoOverlap error.
    pub fn no_overlap(raster: impl std::fmt::Debug, area: impl std::fmt::Debug) -> Self {
        Self::NoOverlap {
            raster: format!("{:?}", raster),
            area: format!("{:?}", area),
        }
    }

    /// Create an InvalidRaster error.
    pub fn invalid_raster(msg: impl Into<String>) -> Self {
        Self::InvalidRaster(msg.into())
    }

    /// Create a ReadFailed error.
    pub fn read_failed(msg: impl Into<String>) -> Self {
        Self::ReadFailed(msg.into())
    }
}

impl From<std::io::Error> for GridProcessorError {
    fn from(err: std::io::Error) -> Self {
        Self::ReadFailed(err.to_string())
    }
}

/// Result type for grid processor operations.
pub type Result<T> = std::result::Result<T, GridProcessorError>;
