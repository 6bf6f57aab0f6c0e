use crate::handlers::{
    delete_entry, evict, get_entry, health, login, migrate, migrate_status, set_entry, sync_data,
    test_connection, update_entry, update_token,
};
use crate::middleware::{auth_middleware, require_post};
use crate::state::AppState;
use axum::{
    extract::{DefaultBodyLimit, Request},
    middleware,
    response::Response,
    routing::post,
    Router,
};
use std::time::Duration;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info_span, Span};

/// Builds the gateway router. `body_limit` caps form bodies in bytes.
pub fn build_router(state: AppState, body_limit: usize) -> Router {
    let tokens = state.tokens.clone();

    let protected = Router::new()
        .route("/updateToken", post(update_token))
        .route("/test", post(test_connection))
        // Cache operations
        .route("/set", post(set_entry))
        .route("/get", post(get_entry))
        .route("/update", post(update_entry))
        .route("/delete", post(delete_entry))
        // Background jobs
        .route("/syncData", post(sync_data))
        .route("/evict", post(evict))
        .route("/migrate", post(migrate))
        .route("/migrate/status", post(migrate_status))
        .route_layer(middleware::from_fn(move |req, next| {
            let tokens = tokens.clone();
            auth_middleware(tokens, req, next)
        }));

    Router::new()
        .route("/login", post(login))
        .route("/health", post(health))
        .merge(protected)
        .with_state(state)
        .layer(middleware::from_fn(require_post))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request| {
                    let request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("-");
                    info_span!(
                        "http_request",
                        request_id = %request_id,
                        method = %request.method(),
                        uri = %request.uri(),
                    )
                })
                .on_response(|response: &Response, latency: Duration, _span: &Span| {
                    let status = response.status();
                    let latency_ms = latency.as_millis() as u64;
                    if status.is_client_error() {
                        tracing::warn!(status = %status, latency_ms, "request failed with client error");
                    } else {
                        tracing::debug!(status = %status, latency_ms, "request completed");
                    }
                }),
        )
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}
