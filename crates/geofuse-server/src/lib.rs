//! GeoFuse server — HTTP plumbing around the orchestration core.
//!
//! Validates uploads, runs a job per request and maps the ranked result to
//! the public JSON shape. Recent job manifests are kept in memory for
//! diagnostics.

pub mod ingress;
pub mod response;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
