//! Cache CRUD endpoints.

use super::parse_json;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::{Form, Json};
use cachegate_core::validate_key;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct SetForm {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Debug, Deserialize)]
pub struct GetForm {
    #[serde(default)]
    pub key: String,
    /// JSON array of pipeline stages.
    pub aggregation: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateForm {
    #[serde(default)]
    pub key: String,
    /// JSON object of update operators.
    #[serde(default)]
    pub doc: String,
}

#[derive(Debug, Deserialize)]
pub struct KeyForm {
    #[serde(default)]
    pub key: String,
}

#[tracing::instrument(skip(state, form))]
pub async fn set_entry(
    State(state): State<AppState>,
    form: Result<Form<SetForm>, FormRejection>,
) -> ApiResult<&'static str> {
    let Form(form) = form?;
    validate_key(&form.key)?;
    let value = parse_json("value", &form.value)?;

    state.service.controller().set(&form.key, &value).await?;
    Ok("ok")
}

#[tracing::instrument(skip(state, form))]
pub async fn get_entry(
    State(state): State<AppState>,
    form: Result<Form<GetForm>, FormRejection>,
) -> ApiResult<Json<Vec<Value>>> {
    let Form(form) = form?;
    validate_key(&form.key)?;

    let aggregation = match form.aggregation.as_deref() {
        None | Some("") => None,
        Some(raw) => {
            let pipeline = parse_json("aggregation", raw)?;
            if !pipeline.is_array() {
                return Err(ApiError::bad_request("aggregation must be an array"));
            }
            Some(pipeline)
        }
    };

    let docs = state
        .service
        .controller()
        .get(&form.key, aggregation.as_ref())
        .await?;
    Ok(Json(docs))
}

#[tracing::instrument(skip(state, form))]
pub async fn update_entry(
    State(state): State<AppState>,
    form: Result<Form<UpdateForm>, FormRejection>,
) -> ApiResult<&'static str> {
    let Form(form) = form?;
    validate_key(&form.key)?;

    let doc = parse_json("doc", &form.doc)?;
    if !doc.is_object() {
        return Err(ApiError::bad_request("update document must be an object"));
    }

    state.service.controller().update(&form.key, &doc).await?;
    Ok("ok")
}

#[tracing::instrument(skip(state, form))]
pub async fn delete_entry(
    State(state): State<AppState>,
    form: Result<Form<KeyForm>, FormRejection>,
) -> ApiResult<&'static str> {
    let Form(form) = form?;
    validate_key(&form.key)?;

    state.service.controller().delete(&form.key).await?;
    Ok("ok")
}
