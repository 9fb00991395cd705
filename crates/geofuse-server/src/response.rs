//! Mapping from the ranked result to the public JSON shape.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use geofuse_core::{Error, Source};
use geofuse_fusion::{AccuracyClass, FusedEstimate, RankedResult, ValidationMetrics};
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::ingress::IngressError;

#[derive(Debug, Clone, Serialize)]
pub struct PublicLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub accuracy: AccuracyClass,
    pub confidence: f64,
    pub sources: Vec<Source>,
}

impl From<&FusedEstimate> for PublicLocation {
    fn from(e: &FusedEstimate) -> Self {
        Self {
            latitude: e.latitude,
            longitude: e.longitude,
            accuracy: e.accuracy_class,
            confidence: round3(e.confidence),
            sources: e.contributing_sources.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GeolocationResult {
    pub predicted_location: PublicLocation,
    pub reasoning: String,
    pub alternative_locations: Vec<PublicLocation>,
    pub is_reliable: bool,
    pub low_confidence: bool,
    pub validation_metrics: ValidationMetrics,
    pub job_id: Uuid,
}

impl GeolocationResult {
    pub fn from_ranked(result: &RankedResult, job_id: Uuid) -> Self {
        Self {
            predicted_location: PublicLocation::from(&result.primary),
            reasoning: result.reasoning.clone(),
            alternative_locations: result.alternatives.iter().map(PublicLocation::from).collect(),
            is_reliable: result.primary.is_reliable && !result.low_confidence,
            low_confidence: result.low_confidence,
            validation_metrics: result.validation,
            job_id,
        }
    }
}

/// `{"status": "success", "result": {...}}`
pub fn success(result: &RankedResult, job_id: Uuid) -> Response {
    let body = json!({
        "status": "success",
        "result": GeolocationResult::from_ranked(result, job_id),
    });
    (StatusCode::OK, Json(body)).into_response()
}

pub fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::NoLocationFound(_) | Error::NoConfidentEstimate { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        Error::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::InvalidCoordinate { .. } => StatusCode::BAD_REQUEST,
        Error::Config(_) | Error::Io(_) | Error::Json(_) | Error::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Job-level failure.
pub fn job_error(error: &Error, job_id: Uuid) -> Response {
    let body = json!({
        "status": "error",
        "detail": error.to_string(),
        "job_id": job_id,
    });
    (status_for(error), Json(body)).into_response()
}

/// Upload rejected before any job was created.
pub fn ingress_error(error: &IngressError) -> Response {
    let body = json!({
        "status": "error",
        "detail": error.to_string(),
    });
    (StatusCode::BAD_REQUEST, Json(body)).into_response()
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimate(lat: f64, confidence: f64, sources: Vec<Source>) -> FusedEstimate {
        FusedEstimate {
            latitude: lat,
            longitude: 2.35,
            confidence,
            accuracy_class: AccuracyClass::Medium,
            contributing_sources: sources,
            span_m: 1500.0,
            member_count: 2,
            total_weight: confidence,
            low_confidence: false,
            is_reliable: confidence >= 0.7,
        }
    }

    fn ranked(low_confidence: bool) -> RankedResult {
        RankedResult {
            primary: estimate(48.85, 0.81234, vec![Source::Landmark, Source::Visual]),
            alternatives: vec![estimate(45.76, 0.3, vec![Source::Reasoning])],
            rejected: vec![estimate(10.0, 0.01, vec![Source::Retrieval])],
            low_confidence,
            reasoning: "Location estimated from landmark, visual.".into(),
            validation: ValidationMetrics {
                consistency_score: 0.03,
                outlier_detection: false,
            },
        }
    }

    #[test]
    fn test_public_shape() {
        let id = Uuid::new_v4();
        let json = serde_json::to_value(GeolocationResult::from_ranked(&ranked(false), id)).unwrap();
        assert_eq!(json["predicted_location"]["latitude"], 48.85);
        assert_eq!(json["predicted_location"]["accuracy"], "medium");
        assert_eq!(json["predicted_location"]["confidence"], 0.812);
        assert_eq!(json["predicted_location"]["sources"][0], "landmark");
        assert_eq!(json["alternative_locations"].as_array().unwrap().len(), 1);
        assert_eq!(json["is_reliable"], true);
        assert_eq!(json["low_confidence"], false);
        assert_eq!(json["validation_metrics"]["consistency_score"], 0.03);
        assert_eq!(json["validation_metrics"]["outlier_detection"], false);
        assert_eq!(json["job_id"], id.to_string());
        assert!(json.get("rejected").is_none());
    }

    #[test]
    fn test_low_confidence_never_reliable() {
        let result = GeolocationResult::from_ranked(&ranked(true), Uuid::new_v4());
        assert!(!result.is_reliable);
        assert!(result.low_confidence);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            status_for(&Error::NoLocationFound("x".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(&Error::Busy("x".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&Error::Internal("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
