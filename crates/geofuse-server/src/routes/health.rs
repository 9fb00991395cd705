//! Liveness routes.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};

use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(api_health))
}

/// GET /health
pub async fn service_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "GeoFuse",
    }))
}

/// GET /api/v1/health: liveness plus a little runtime detail.
async fn api_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let estimators: Vec<&str> = state
        .orchestrator
        .estimators()
        .iter()
        .map(|e| e.name())
        .collect();

    Json(serde_json::json!({
        "status": "healthy",
        "service": "GeoFuse Geolocation API",
        "estimators": estimators,
        "available_slots": state.orchestrator.available_permits(),
        "recent_jobs": state.recent_job_count(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}
