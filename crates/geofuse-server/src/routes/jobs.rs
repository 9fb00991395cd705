//! Diagnostics for recent jobs.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use uuid::Uuid;

use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/jobs/{id}", get(get_job))
}

/// GET /api/v1/jobs/{id}: manifest of a recent job.
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let Ok(id) = Uuid::parse_str(&id) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "status": "error", "detail": "Invalid job id" })),
        );
    };

    match state.find_job(id) {
        Some(manifest) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": "success", "job": manifest })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "status": "error", "detail": "Job not found" })),
        ),
    }
}
