//! Error types for GeoFuse.

use thiserror::Error;

use crate::candidate::Source;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No location found: {0}")]
    NoLocationFound(String),

    #[error("No estimate cleared the confidence threshold (best={best:.3}, threshold={threshold:.3})")]
    NoConfidentEstimate { best: f64, threshold: f64 },

    #[error("Invalid coordinate from {estimator}: lat={latitude}, lon={longitude}")]
    InvalidCoordinate {
        estimator: Source,
        latitude: f64,
        longitude: f64,
    },

    #[error("Busy: {0}")]
    Busy(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
