//! Background job triggers. All of them return immediately.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::{Form, Json};
use cachegate_service::{MigrationMode, MigrationProgress};
use serde::Deserialize;

pub async fn sync_data(State(state): State<AppState>) -> &'static str {
    if !state.service.sync().trigger() {
        tracing::debug!("Sync requested while a sweep is running");
    }
    "ok"
}

pub async fn evict(State(state): State<AppState>) -> &'static str {
    if !state.service.eviction().trigger() {
        tracing::debug!("Eviction requested while a sweep is running");
    }
    "ok"
}

#[derive(Debug, Deserialize)]
pub struct MigrateForm {
    /// Metadata store URL of the receiving instance.
    #[serde(default)]
    pub target: String,
    pub mode: Option<String>,
}

#[tracing::instrument(skip(state, form))]
pub async fn migrate(
    State(state): State<AppState>,
    form: Result<Form<MigrateForm>, FormRejection>,
) -> ApiResult<&'static str> {
    let Form(form) = form?;
    if form.target.trim().is_empty() {
        return Err(ApiError::bad_request("target must not be empty"));
    }
    let mode = match form.mode.as_deref() {
        None | Some("") => MigrationMode::default(),
        Some(raw) => raw.parse()?,
    };

    if state.service.migration().start(&form.target, mode)? {
        Ok("ok")
    } else {
        Ok("migration already running")
    }
}

pub async fn migrate_status(State(state): State<AppState>) -> Json<MigrationProgress> {
    Json(state.service.migration().progress())
}
