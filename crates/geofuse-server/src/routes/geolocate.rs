//! Geolocation endpoint.

use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use geofuse_estimators::FixedEstimator;
use geofuse_runtime::JobRequest;
use tracing::{info, warn};

use crate::ingress::{IngressError, UploadForm};
use crate::response;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/geolocate", post(geolocate))
}

/// POST /api/v1/geolocate with multipart `image`, optional `context`,
/// `latitude` and `longitude`.
async fn geolocate(State(state): State<Arc<AppState>>, multipart: Multipart) -> Response {
    let form = match read_form(multipart).await {
        Ok(form) => form,
        Err(e) => return response::ingress_error(&e),
    };

    let upload = match form.validate(&state.config.server) {
        Ok(upload) => upload,
        Err(e) => {
            warn!("Rejected upload: {}", e);
            return response::ingress_error(&e);
        }
    };

    let mut request = JobRequest::new(upload.image);
    if let Some(context) = upload.context {
        request = request.with_context(context);
    }
    if let Some((lat, lon)) = upload.gps_fix {
        info!("Upload carries a GPS fix, adding metadata estimator");
        request = request.with_extra(Arc::new(FixedEstimator::gps_fix(lat, lon)));
    }

    let report = state.orchestrator.run(request).await;
    let job_id = report.job_id();
    let response = match &report.outcome {
        Ok(result) => response::success(result, job_id),
        Err(e) => response::job_error(e, job_id),
    };
    state.remember(report.manifest);
    response
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, IngressError> {
    let mut form = UploadForm::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return Err(IngressError::Malformed(e.to_string())),
        };

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "image" => {
                form.filename = field.file_name().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| IngressError::Malformed(e.to_string()))?;
                form.image = Some(bytes.to_vec());
            }
            "context" | "latitude" | "longitude" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| IngressError::Malformed(e.to_string()))?;
                match name.as_str() {
                    "context" => form.context = Some(text),
                    "latitude" => form.latitude = Some(text),
                    _ => form.longitude = Some(text),
                }
            }
            _ => {}
        }
    }

    Ok(form)
}
