//! Request guards: POST-only methods and bearer-token authentication.

use crate::error::ApiError;
use crate::tokens::TokenRing;
use axum::{
    extract::Request,
    http::{HeaderMap, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use cachegate_core::CoreError;
use std::sync::Arc;

/// Every endpoint is POST; anything else is refused before routing or auth.
pub async fn require_post(request: Request, next: Next) -> Response {
    if request.method() != Method::POST {
        tracing::debug!(
            method = %request.method(),
            path = %request.uri().path(),
            "Method not allowed"
        );
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    next.run(request).await
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Reject requests whose bearer token matches neither live slot.
pub async fn auth_middleware(tokens: Arc<TokenRing>, request: Request, next: Next) -> Response {
    let valid = bearer_token(request.headers()).is_some_and(|token| tokens.verify(token));
    if !valid {
        tracing::warn!(
            path = %request.uri().path(),
            "Rejected request with missing or stale token"
        );
        return ApiError::from(CoreError::Unauthorized).into_response();
    }
    next.run(request).await
}
