//! Parsing of model-style prediction payloads into candidates.
//!
//! Remote estimators reply with JSON, sometimes wrapped in a markdown code
//! fence or surrounded by prose. Two shapes are accepted:
//!
//! ```json
//! {"candidates": [{"latitude": 1.0, "longitude": 2.0, "confidence": 0.7}]}
//! ```
//!
//! and the prediction shape
//!
//! ```json
//! {"predicted_location": {"latitude": 1.0, "longitude": 2.0, "accuracy": "medium",
//!  "confidence": 0.6}, "alternative_locations": [...]}
//! ```

use geofuse_core::{GeoCandidate, Source};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::EstimatorError;

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").expect("static regex"));

/// Typical uncertainty radius for a coarse accuracy label: street,
/// city and region scale.
pub fn radius_for_accuracy(label: &str) -> Option<f64> {
    match label.trim().to_ascii_lowercase().as_str() {
        "high" => Some(1_000.0),
        "medium" => Some(10_000.0),
        "low" => Some(100_000.0),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct RawLocation {
    latitude: Option<f64>,
    longitude: Option<f64>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default, alias = "radius_m")]
    uncertainty_radius_m: Option<f64>,
    #[serde(default)]
    accuracy: Option<String>,
}

impl RawLocation {
    fn into_candidate(self, source: Source, default_confidence: f64) -> Option<GeoCandidate> {
        let (latitude, longitude) = (self.latitude?, self.longitude?);
        let mut candidate = GeoCandidate::new(
            source,
            latitude,
            longitude,
            self.confidence.unwrap_or(default_confidence),
        );
        let radius = self
            .uncertainty_radius_m
            .or_else(|| self.accuracy.as_deref().and_then(radius_for_accuracy));
        if let Some(r) = radius {
            candidate = candidate.with_radius(r);
        }
        Some(candidate)
    }
}

/// Pull the JSON object out of a possibly decorated reply.
pub fn extract_json(text: &str) -> Option<&str> {
    if let Some(caps) = FENCED_JSON.captures(text) {
        return caps.get(1).map(|m| m.as_str());
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a prediction payload into candidates tagged with `source`.
///
/// Locations without both coordinates are skipped. A payload that is not
/// JSON, or yields no coordinates at all, is an `InvalidResponse`.
/// Coordinate range checks happen later, at clustering.
pub fn parse_prediction_payload(
    text: &str,
    source: Source,
    default_confidence: f64,
) -> Result<Vec<GeoCandidate>, EstimatorError> {
    let json = extract_json(text)
        .ok_or_else(|| EstimatorError::InvalidResponse("no JSON object in payload".into()))?;
    let value: Value = serde_json::from_str(json)
        .map_err(|e| EstimatorError::InvalidResponse(format!("malformed JSON: {}", e)))?;

    let mut raw: Vec<Value> = Vec::new();
    if let Some(Value::Array(items)) = value.get("candidates") {
        raw.extend(items.iter().cloned());
    } else {
        if let Some(primary) = value.get("predicted_location") {
            raw.push(primary.clone());
        }
        if let Some(Value::Array(items)) = value.get("alternative_locations") {
            raw.extend(items.iter().cloned());
        }
    }

    let candidates: Vec<GeoCandidate> = raw
        .into_iter()
        .filter_map(|v| serde_json::from_value::<RawLocation>(v).ok())
        .filter_map(|loc| loc.into_candidate(source, default_confidence))
        .collect();

    if candidates.is_empty() {
        return Err(EstimatorError::InvalidResponse(
            "payload contains no coordinates".into(),
        ));
    }
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidates_shape() {
        let text = r#"{"candidates": [
            {"latitude": 48.85, "longitude": 2.35, "confidence": 0.8, "uncertainty_radius_m": 250},
            {"latitude": 45.76, "longitude": 4.83}
        ]}"#;
        let out = parse_prediction_payload(text, Source::Retrieval, 0.5).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].raw_confidence, 0.8);
        assert_eq!(out[0].uncertainty_radius_m, Some(250.0));
        assert_eq!(out[1].raw_confidence, 0.5);
        assert_eq!(out[1].uncertainty_radius_m, None);
        assert!(out.iter().all(|c| c.source == Source::Retrieval));
    }

    #[test]
    fn test_prediction_shape_in_fence() {
        let text = "Here is my answer:\n```json\n{\"predicted_location\": {\"latitude\": 35.68, \
                    \"longitude\": 139.69, \"accuracy\": \"medium\", \"confidence\": 0.6}, \
                    \"reasoning\": \"signs\", \"alternative_locations\": [{\"latitude\": 34.69, \
                    \"longitude\": 135.50, \"confidence\": 0.2}]}\n```\nHope that helps.";
        let out = parse_prediction_payload(text, Source::Reasoning, 0.4).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].latitude, 35.68);
        assert_eq!(out[0].uncertainty_radius_m, Some(10_000.0));
        assert_eq!(out[1].raw_confidence, 0.2);
    }

    #[test]
    fn test_bare_object_with_prose() {
        let text = r#"I think {"predicted_location": {"latitude": 1.5, "longitude": 2.5}} is it."#;
        let out = parse_prediction_payload(text, Source::Visual, 0.3).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].raw_confidence, 0.3);
    }

    #[test]
    fn test_rejects_non_json() {
        let err = parse_prediction_payload("no idea, sorry", Source::Reasoning, 0.4).unwrap_err();
        assert!(matches!(err, EstimatorError::InvalidResponse(_)));

        let err = parse_prediction_payload("{not json}", Source::Reasoning, 0.4).unwrap_err();
        assert!(matches!(err, EstimatorError::InvalidResponse(_)));
    }

    #[test]
    fn test_rejects_missing_coordinates() {
        let text = r#"{"predicted_location": {"accuracy": "low"}, "alternative_locations": []}"#;
        let err = parse_prediction_payload(text, Source::Reasoning, 0.4).unwrap_err();
        assert!(matches!(err, EstimatorError::InvalidResponse(_)));
    }

    #[test]
    fn test_accuracy_labels() {
        assert_eq!(radius_for_accuracy("HIGH"), Some(1_000.0));
        assert_eq!(radius_for_accuracy("medium"), Some(10_000.0));
        assert_eq!(radius_for_accuracy("low"), Some(100_000.0));
        assert_eq!(radius_for_accuracy("unknown"), None);
    }
}
