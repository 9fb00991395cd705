//! Candidate locations produced by estimators, and per-source trust weights.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Estimator that produced a candidate.
///
/// The declaration order is the stable sort key used before clustering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    /// GPS fix taken from image metadata (EXIF).
    Metadata,
    /// Visual-scene classifier.
    Visual,
    /// Landmark / feature matcher.
    Landmark,
    /// Geotagged-image retrieval index.
    Retrieval,
    /// Language-model reasoning pass.
    Reasoning,
}

impl Source {
    pub const ALL: [Source; 5] = [
        Source::Metadata,
        Source::Visual,
        Source::Landmark,
        Source::Retrieval,
        Source::Reasoning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metadata => "metadata",
            Self::Visual => "visual",
            Self::Landmark => "landmark",
            Self::Retrieval => "retrieval",
            Self::Reasoning => "reasoning",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Source {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "metadata" | "exif" => Ok(Self::Metadata),
            "visual" => Ok(Self::Visual),
            "landmark" => Ok(Self::Landmark),
            "retrieval" => Ok(Self::Retrieval),
            "reasoning" | "llm" => Ok(Self::Reasoning),
            other => Err(Error::Config(format!("Unknown estimator source: {}", other))),
        }
    }
}

/// One estimator's opinion about where the image was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoCandidate {
    pub source: Source,
    pub latitude: f64,
    pub longitude: f64,
    /// Radius of uncertainty in meters. `Some(0.0)` is an exact fix,
    /// `None` means the estimator could not say.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uncertainty_radius_m: Option<f64>,
    /// Self-reported confidence in [0, 1].
    pub raw_confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl GeoCandidate {
    pub fn new(source: Source, latitude: f64, longitude: f64, raw_confidence: f64) -> Self {
        Self {
            source,
            latitude,
            longitude,
            uncertainty_radius_m: None,
            raw_confidence,
            timestamp: Utc::now(),
        }
    }

    pub fn with_radius(mut self, radius_m: f64) -> Self {
        self.uncertainty_radius_m = Some(radius_m);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether this candidate is an exact fix (radius of zero).
    pub fn is_exact(&self) -> bool {
        self.uncertainty_radius_m == Some(0.0)
    }

    pub fn has_valid_coordinates(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }

    /// Check coordinates and normalize the remaining fields.
    ///
    /// Out-of-range or non-finite coordinates are rejected. Confidence is
    /// clamped into [0, 1] (NaN becomes 0); a negative, NaN or infinite
    /// radius becomes unknown.
    pub fn validated(mut self) -> Result<Self> {
        if !self.has_valid_coordinates() {
            return Err(Error::InvalidCoordinate {
                estimator: self.source,
                latitude: self.latitude,
                longitude: self.longitude,
            });
        }

        self.raw_confidence = if self.raw_confidence.is_nan() {
            0.0
        } else {
            self.raw_confidence.clamp(0.0, 1.0)
        };

        self.uncertainty_radius_m = self
            .uncertainty_radius_m
            .filter(|r| r.is_finite() && *r >= 0.0);

        Ok(self)
    }

    /// Total order independent of arrival order: source, then coordinates,
    /// then confidence and radius.
    pub fn stable_cmp(&self, other: &Self) -> Ordering {
        self.source
            .cmp(&other.source)
            .then_with(|| self.latitude.total_cmp(&other.latitude))
            .then_with(|| self.longitude.total_cmp(&other.longitude))
            .then_with(|| self.raw_confidence.total_cmp(&other.raw_confidence))
            .then_with(|| {
                let a = self.uncertainty_radius_m.unwrap_or(f64::INFINITY);
                let b = other.uncertainty_radius_m.unwrap_or(f64::INFINITY);
                a.total_cmp(&b)
            })
    }
}

/// Static trust weight per source, in (0, 1].
///
/// Loaded once at startup and shared read-only by every job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityPriors {
    #[serde(default = "default_metadata")]
    pub metadata: f64,
    #[serde(default = "default_visual")]
    pub visual: f64,
    #[serde(default = "default_landmark")]
    pub landmark: f64,
    #[serde(default = "default_retrieval")]
    pub retrieval: f64,
    #[serde(default = "default_reasoning")]
    pub reasoning: f64,
}

fn default_metadata() -> f64 {
    0.95
}
fn default_visual() -> f64 {
    0.60
}
fn default_landmark() -> f64 {
    0.85
}
fn default_retrieval() -> f64 {
    0.70
}
fn default_reasoning() -> f64 {
    0.40
}

impl Default for ReliabilityPriors {
    fn default() -> Self {
        Self {
            metadata: default_metadata(),
            visual: default_visual(),
            landmark: default_landmark(),
            retrieval: default_retrieval(),
            reasoning: default_reasoning(),
        }
    }
}

impl ReliabilityPriors {
    pub fn weight(&self, source: Source) -> f64 {
        match source {
            Source::Metadata => self.metadata,
            Source::Visual => self.visual,
            Source::Landmark => self.landmark,
            Source::Retrieval => self.retrieval,
            Source::Reasoning => self.reasoning,
        }
    }

    pub fn set_weight(&mut self, source: Source, weight: f64) {
        match source {
            Source::Metadata => self.metadata = weight,
            Source::Visual => self.visual = weight,
            Source::Landmark => self.landmark = weight,
            Source::Retrieval => self.retrieval = weight,
            Source::Reasoning => self.reasoning = weight,
        }
    }

    /// Every prior must lie in (0, 1].
    pub fn validate(&self) -> Result<()> {
        for source in Source::ALL {
            let w = self.weight(source);
            if !(w > 0.0 && w <= 1.0) {
                return Err(Error::Config(format!(
                    "Reliability prior for {} must be in (0, 1], got {}",
                    source, w
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_roundtrip_str() {
        for source in Source::ALL {
            let parsed: Source = source.as_str().parse().unwrap();
            assert_eq!(parsed, source);
        }
        assert_eq!("EXIF".parse::<Source>().unwrap(), Source::Metadata);
        assert!("satellite".parse::<Source>().is_err());
    }

    #[test]
    fn test_source_serializes_lowercase() {
        let json = serde_json::to_string(&Source::Landmark).unwrap();
        assert_eq!(json, "\"landmark\"");
    }

    #[test]
    fn test_validated_rejects_out_of_range() {
        let bad = GeoCandidate::new(Source::Visual, 91.0, 0.0, 0.5);
        match bad.validated() {
            Err(Error::InvalidCoordinate { estimator, .. }) => {
                assert_eq!(estimator, Source::Visual)
            }
            other => panic!("expected InvalidCoordinate, got {:?}", other),
        }

        let nan = GeoCandidate::new(Source::Visual, f64::NAN, 0.0, 0.5);
        assert!(nan.validated().is_err());

        let wrapped = GeoCandidate::new(Source::Visual, 10.0, 180.5, 0.5);
        assert!(wrapped.validated().is_err());
    }

    #[test]
    fn test_validated_normalizes_fields() {
        let c = GeoCandidate::new(Source::Reasoning, 10.0, 20.0, 1.7)
            .with_radius(-5.0)
            .validated()
            .unwrap();
        assert_eq!(c.raw_confidence, 1.0);
        assert_eq!(c.uncertainty_radius_m, None);

        let c = GeoCandidate::new(Source::Reasoning, 10.0, 20.0, f64::NAN)
            .with_radius(f64::INFINITY)
            .validated()
            .unwrap();
        assert_eq!(c.raw_confidence, 0.0);
        assert_eq!(c.uncertainty_radius_m, None);
    }

    #[test]
    fn test_is_exact() {
        let c = GeoCandidate::new(Source::Metadata, 1.0, 2.0, 0.95).with_radius(0.0);
        assert!(c.is_exact());
        assert!(!GeoCandidate::new(Source::Metadata, 1.0, 2.0, 0.95).is_exact());
    }

    #[test]
    fn test_stable_cmp_orders_by_source_first() {
        let a = GeoCandidate::new(Source::Reasoning, -10.0, 0.0, 0.9);
        let b = GeoCandidate::new(Source::Metadata, 50.0, 0.0, 0.1);
        assert_eq!(a.stable_cmp(&b), Ordering::Greater);
        assert_eq!(b.stable_cmp(&a), Ordering::Less);
    }

    #[test]
    fn test_priors_default_ordering() {
        let p = ReliabilityPriors::default();
        assert!(p.weight(Source::Metadata) > p.weight(Source::Landmark));
        assert!(p.weight(Source::Landmark) > p.weight(Source::Visual));
        assert!(p.weight(Source::Visual) > p.weight(Source::Reasoning));
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_priors_validate_range() {
        let mut p = ReliabilityPriors::default();
        p.set_weight(Source::Visual, 0.0);
        assert!(p.validate().is_err());
        p.set_weight(Source::Visual, 1.2);
        assert!(p.validate().is_err());
        p.set_weight(Source::Visual, 1.0);
        assert!(p.validate().is_ok());
    }
}
