//! Connectivity check for supervisors.
//!
//! `POST /health` re-checks the storage engine and the metadata store and
//! answers 503 while either is unreachable. It needs no token so a process
//! supervisor can poll it.

use crate::state::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde_json::json;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.service.health_check().await {
        Ok(()) => (StatusCode::OK, Json(json!({ "status": "healthy" }))),
        Err(e) => {
            tracing::error!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "message": e.to_string() })),
            )
        }
    }
}
