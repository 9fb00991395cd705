//! GeoFuse Estimators — the capability every signal source implements.
//!
//! An estimator turns an image (plus optional context) into zero or more
//! candidate locations. `HttpEstimator` talks to a remote service,
//! `FixedEstimator` answers from a predetermined list.

pub mod error;
pub mod estimator;
pub mod fixed;
pub mod http;
pub mod payload;

pub use error::{EstimatorError, FailureKind};
pub use estimator::{Estimator, ImageRef};
pub use fixed::FixedEstimator;
pub use http::HttpEstimator;
pub use payload::parse_prediction_payload;

use std::sync::Arc;

use geofuse_core::{GeoFuseConfig, Result};
use reqwest::Client;

/// Build one HTTP estimator per configured endpoint, sharing a client.
pub fn create_estimators(config: &GeoFuseConfig) -> Result<Vec<Arc<dyn Estimator>>> {
    let client = Client::builder()
        .timeout(config.orchestration.estimator_timeout())
        .build()
        .map_err(|e| geofuse_core::Error::Config(format!("HTTP client: {}", e)))?;

    let estimators: Vec<Arc<dyn Estimator>> = config
        .estimators
        .iter()
        .map(|endpoint| {
            tracing::info!("Registered {} estimator at {}", endpoint.source, endpoint.url);
            Arc::new(HttpEstimator::new(client.clone(), endpoint)) as Arc<dyn Estimator>
        })
        .collect();

    if estimators.is_empty() {
        tracing::warn!("No estimator endpoints configured");
    }
    Ok(estimators)
}
