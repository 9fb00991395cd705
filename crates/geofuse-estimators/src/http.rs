//! Estimator backed by a remote HTTP endpoint.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use geofuse_core::{EndpointSettings, GeoCandidate, Source};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::EstimatorError;
use crate::estimator::{Estimator, ImageRef};
use crate::payload::parse_prediction_payload;

/// Posts the image and context as JSON and parses the prediction payload
/// in the reply.
#[derive(Debug, Clone)]
pub struct HttpEstimator {
    client: Client,
    source: Source,
    name: String,
    url: String,
    api_key: Option<String>,
    default_confidence: f64,
    latency_hint: Option<Duration>,
}

impl HttpEstimator {
    pub fn new(client: Client, endpoint: &EndpointSettings) -> Self {
        Self {
            client,
            source: endpoint.source,
            name: format!("{}-http", endpoint.source),
            url: endpoint.url.clone(),
            api_key: endpoint.api_key.clone(),
            default_confidence: endpoint.default_confidence,
            latency_hint: endpoint.latency_hint_ms.map(Duration::from_millis),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request_body(&self, image: &ImageRef, context: Option<&str>) -> Value {
        json!({
            "source": self.source,
            "image": STANDARD.encode(image.bytes()),
            "filename": image.filename(),
            "sha256": image.sha256(),
            "context": context,
        })
    }
}

#[async_trait]
impl Estimator for HttpEstimator {
    fn source(&self) -> Source {
        self.source
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn latency_hint(&self) -> Option<Duration> {
        self.latency_hint
    }

    async fn estimate(
        &self,
        image: &ImageRef,
        context: Option<&str>,
    ) -> Result<Vec<GeoCandidate>, EstimatorError> {
        debug!("Posting image {} to {}", image.short_id(), self.url);

        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&self.request_body(image, context));
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EstimatorError::from_status(status.as_u16(), &body));
        }

        let text = response
            .text()
            .await
            .map_err(|e| EstimatorError::InvalidResponse(format!("unreadable body: {}", e)))?;
        parse_prediction_payload(&text, self.source, self.default_confidence)
    }
}
