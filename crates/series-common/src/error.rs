//! Configuration errors for time series requests.

use thiserror::Error;

/// Result type alias using SeriesError.
pub type SeriesResult<T> = Result<T, SeriesError>;

/// Errors raised while validating a request. All of them are fatal for a run.
#[derive(Debug, Error)]
pub enum SeriesError {
    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidRange { start: String, end: String },

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Unknown cadence: {0}")]
    InvalidCadence(String),

    #[error("Invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("Invalid area of interest: {0}")]
    InvalidAoi(String),

    #[error("Invalid naming template '{template}': {message}")]
    InvalidTemplate { template: String, message: String },
}

impl SeriesError {
    pub fn invalid_template(template: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            template: template.into(),
            message: message.into(),
        }
    }
}
