//! Login and token refresh.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::Form;
use serde::Deserialize;
use subtle::ConstantTimeEq;

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub password: String,
}

/// Exchange the gateway password for the current token.
pub async fn login(
    State(state): State<AppState>,
    form: Result<Form<LoginForm>, FormRejection>,
) -> ApiResult<String> {
    let Form(form) = form?;
    let expected = state.password.as_bytes();
    let given = form.password.as_bytes();

    let matches = expected.len() == given.len() && bool::from(expected.ct_eq(given));
    if !matches {
        tracing::warn!("Login failed: wrong password");
        return Err(ApiError::bad_request("invalid password"));
    }

    tracing::info!("Login succeeded");
    Ok(state.tokens.current())
}

/// Hand out the newest token to an authenticated client.
pub async fn update_token(State(state): State<AppState>) -> String {
    state.tokens.current()
}

/// Connectivity probe for clients.
pub async fn test_connection() -> &'static str {
    "cachegate ok"
}
