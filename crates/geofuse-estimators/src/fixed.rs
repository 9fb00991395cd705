//! Estimator with a predetermined answer.
//!
//! Backs offline mode, carries an upstream EXIF fix into the pipeline, and
//! stands in for remote estimators in tests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use geofuse_core::{GeoCandidate, Source};

use crate::error::EstimatorError;
use crate::estimator::{Estimator, ImageRef};

#[derive(Debug, Clone)]
enum Reply {
    Candidates(Vec<GeoCandidate>),
    Fail(EstimatorError),
}

#[derive(Debug, Clone)]
pub struct FixedEstimator {
    source: Source,
    name: String,
    reply: Reply,
    delay: Option<Duration>,
    latency_hint: Option<Duration>,
}

impl FixedEstimator {
    /// Always answer with `candidates`.
    pub fn new(source: Source, candidates: Vec<GeoCandidate>) -> Self {
        Self {
            source,
            name: source.as_str().to_string(),
            reply: Reply::Candidates(candidates),
            delay: None,
            latency_hint: None,
        }
    }

    /// Always fail with `error`.
    pub fn failing(source: Source, error: EstimatorError) -> Self {
        Self {
            reply: Reply::Fail(error),
            ..Self::new(source, Vec::new())
        }
    }

    /// An exact metadata fix, as handed over by the ingress layer.
    pub fn gps_fix(latitude: f64, longitude: f64) -> Self {
        let candidate =
            GeoCandidate::new(Source::Metadata, latitude, longitude, 0.95).with_radius(0.0);
        Self::new(Source::Metadata, vec![candidate]).with_name("exif")
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sleep this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_latency_hint(mut self, hint: Duration) -> Self {
        self.latency_hint = Some(hint);
        self
    }
}

#[async_trait]
impl Estimator for FixedEstimator {
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
        _image: &ImageRef,
        _context: Option<&str>,
    ) -> Result<Vec<GeoCandidate>, EstimatorError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.reply {
            Reply::Candidates(candidates) => {
                let now = Utc::now();
                Ok(candidates
                    .iter()
                    .cloned()
                    .map(|c| c.with_timestamp(now))
                    .collect())
            }
            Reply::Fail(e) => Err(e.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> ImageRef {
        ImageRef::new(vec![1, 2, 3], None)
    }

    #[tokio::test]
    async fn test_returns_candidates() {
        let est = FixedEstimator::new(
            Source::Visual,
            vec![GeoCandidate::new(Source::Visual, 10.0, 20.0, 0.6)],
        );
        let out = est.estimate(&image(), Some("street")).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].latitude, 10.0);
        assert_eq!(est.name(), "visual");
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let est = FixedEstimator::failing(
            Source::Landmark,
            EstimatorError::Unavailable("down".into()),
        );
        let err = est.estimate(&image(), None).await.unwrap_err();
        assert_eq!(err, EstimatorError::Unavailable("down".into()));
    }

    #[tokio::test]
    async fn test_gps_fix_is_exact() {
        let est = FixedEstimator::gps_fix(48.8566, 2.3522);
        let out = est.estimate(&image(), None).await.unwrap();
        assert!(out[0].is_exact());
        assert_eq!(est.source(), Source::Metadata);
        assert_eq!(est.name(), "exif");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_is_honoured() {
        let est = FixedEstimator::new(Source::Visual, Vec::new())
            .with_delay(Duration::from_secs(5));
        let start = tokio::time::Instant::now();
        est.estimate(&image(), None).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
