//! Normalized estimator failures.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Every estimator-specific failure collapses into one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EstimatorError {
    #[error("Estimator timed out after {0} ms")]
    Timeout(u64),

    #[error("Estimator unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid estimator response: {0}")]
    InvalidResponse(String),

    #[error("Estimator rate limited: {0}")]
    RateLimited(String),
}

impl EstimatorError {
    /// Map an HTTP status to the taxonomy. Success statuses never get here.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = format!("HTTP {}: {}", status, truncate(body, 200));
        match status {
            429 => Self::RateLimited(detail),
            500..=599 => Self::Unavailable(detail),
            _ => Self::InvalidResponse(detail),
        }
    }

    /// Only transient failures are worth an immediate retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::RateLimited(_))
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::Timeout(_) => FailureKind::EstimatorTimeout,
            Self::Unavailable(_) => FailureKind::EstimatorUnavailable,
            Self::InvalidResponse(_) => FailureKind::EstimatorInvalidResponse,
            Self::RateLimited(_) => FailureKind::EstimatorRateLimited,
        }
    }
}

impl From<reqwest::Error> for EstimatorError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(0)
        } else if e.is_connect() || e.is_request() {
            Self::Unavailable(e.to_string())
        } else if let Some(status) = e.status() {
            Self::from_status(status.as_u16(), &e.to_string())
        } else {
            Self::InvalidResponse(e.to_string())
        }
    }
}

/// Failure category recorded in a job manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    EstimatorTimeout,
    EstimatorUnavailable,
    EstimatorInvalidResponse,
    EstimatorRateLimited,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EstimatorTimeout => "EstimatorTimeout",
            Self::EstimatorUnavailable => "EstimatorUnavailable",
            Self::EstimatorInvalidResponse => "EstimatorInvalidResponse",
            Self::EstimatorRateLimited => "EstimatorRateLimited",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
