//! Gateway routing tests over an in-memory store.

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use cachegate_core::GatewayConfig;
use cachegate_metadata::{open_store, EntryRepository};
use cachegate_rest::{build_router, AppState, TokenRing};
use cachegate_service::CacheService;
use cachegate_storage::{CompressionConfig, MockObjectStore, ObjectStoreEngine};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

const PASSWORD: &str = "correct horse";

struct Gateway {
    app: Router,
    token: String,
    service: Arc<CacheService>,
    store: Arc<MockObjectStore>,
}

async fn gateway() -> Gateway {
    let entries = EntryRepository::new(open_store("sqlite::memory:", 1).await.unwrap());
    let store = Arc::new(MockObjectStore::new());
    let engine = Arc::new(
        ObjectStoreEngine::new("memory", store.clone(), CompressionConfig::default(), None)
            .unwrap(),
    );
    let service = Arc::new(CacheService::new(
        entries,
        engine,
        &GatewayConfig::default(),
        1 << 30,
    ));
    let tokens = Arc::new(TokenRing::new());
    let token = tokens.current();

    Gateway {
        app: build_router(AppState::new(service.clone(), tokens, PASSWORD), 1 << 20),
        token,
        service,
        store,
    }
}

fn encode(fields: &[(&str, &str)]) -> String {
    fields
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn form(path: &str, token: Option<&str>, fields: &[(&str, &str)]) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header("content-type", "application/x-www-form-urlencoded");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    builder.body(Body::from(encode(fields))).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(body.to_vec()).unwrap())
}

#[tokio::test]
async fn test_login_hands_out_current_token() {
    let gw = gateway().await;

    let (status, _) = send(&gw.app, form("/login", None, &[("password", "wrong")])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&gw.app, form("/login", None, &[("password", PASSWORD)])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, gw.token);

    let (status, body) = send(&gw.app, form("/updateToken", Some(&gw.token), &[])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, gw.token);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let gw = gateway().await;

    let (status, _) = send(&gw.app, form("/test", None, &[])).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&gw.app, form("/set", Some("bogus"), &[("key", "a")])).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(&gw.app, form("/test", Some(&gw.token), &[])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "cachegate ok");
}

#[tokio::test]
async fn test_health_reports_storage_outage() {
    let gw = gateway().await;

    let (status, body) = send(&gw.app, form("/health", None, &[])).await;
    assert_eq!(status, StatusCode::OK);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["status"], "healthy");

    gw.store.set_offline(true);
    let (status, body) = send(&gw.app, form("/health", None, &[])).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(body["status"], "unhealthy");
    assert!(!gw.service.is_healthy());
}

#[tokio::test]
async fn test_non_post_is_method_not_allowed() {
    let gw = gateway().await;
    let request = Request::builder()
        .method(Method::GET)
        .uri("/get")
        .header("authorization", format!("Bearer {}", gw.token))
        .body(Body::empty())
        .unwrap();

    let (status, _) = send(&gw.app, request).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_crud_round_trip() {
    let gw = gateway().await;
    let token = Some(gw.token.as_str());

    let (status, body) = send(
        &gw.app,
        form("/set", token, &[("key", "a"), ("value", r#"{"x":1,"tags":["t"]}"#)]),
    )
    .await;
    assert_eq!((status, body.as_str()), (StatusCode::OK, "ok"));

    let (status, body) = send(&gw.app, form("/get", token, &[("key", "a")])).await;
    assert_eq!(status, StatusCode::OK);
    let docs: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(docs, json!([{"x": 1, "tags": ["t"]}]));

    let (status, _) = send(
        &gw.app,
        form("/update", token, &[("key", "a"), ("doc", r#"{"$set":{"x":2}}"#)]),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = send(
        &gw.app,
        form(
            "/get",
            token,
            &[("key", "a"), ("aggregation", r#"[{"$project":{"x":1}}]"#)],
        ),
    )
    .await;
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!([{"x": 2}]));

    let (status, _) = send(&gw.app, form("/delete", token, &[("key", "a")])).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&gw.app, form("/get", token, &[("key", "a")])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("not found"), "unexpected body: {}", body);
}

#[tokio::test]
async fn test_bad_input_is_a_client_error() {
    let gw = gateway().await;
    let token = Some(gw.token.as_str());

    let (status, body) = send(&gw.app, form("/get", token, &[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "key must not be empty");

    let (status, _) = send(&gw.app, form("/set", token, &[("key", "a"), ("value", "{nope")])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    send(&gw.app, form("/set", token, &[("key", "a"), ("value", "1")])).await;
    let (status, body) = send(
        &gw.app,
        form("/get", token, &[("key", "a"), ("aggregation", r#"{"$match":{}}"#)]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "aggregation must be an array");

    let (status, body) = send(&gw.app, form("/update", token, &[("key", "a"), ("doc", "[1]")])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "update document must be an object");

    let (status, _) = send(
        &gw.app,
        form("/get", token, &[("key", "a"), ("aggregation", r#"[{"$out":"x"}]"#)]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_sync_trigger_flushes_in_background() {
    let gw = gateway().await;
    let token = Some(gw.token.as_str());
    send(&gw.app, form("/set", token, &[("key", "a"), ("value", "\"v\"")])).await;

    let (status, body) = send(&gw.app, form("/syncData", token, &[])).await;
    assert_eq!((status, body.as_str()), (StatusCode::OK, "ok"));

    assert!(gw.service.sync().wait_idle(Duration::from_secs(5)).await);
    assert!(gw.store.contains_key("a"));

    let (status, _) = send(&gw.app, form("/evict", token, &[])).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_migration_endpoints() {
    let gw = gateway().await;
    let token = Some(gw.token.as_str());

    let (status, body) = send(&gw.app, form("/migrate", token, &[])).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, "target must not be empty");

    let (status, _) = send(
        &gw.app,
        form("/migrate", token, &[("target", "sqlite::memory:"), ("mode", "sideways")]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // disabled by default
    let (status, body) = send(
        &gw.app,
        form("/migrate", token, &[("target", "sqlite::memory:")]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("invalid state"), "unexpected body: {}", body);

    let (status, body) = send(&gw.app, form("/migrate/status", token, &[])).await;
    assert_eq!(status, StatusCode::OK);
    let progress: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(progress["phase"], "idle");
    assert_eq!(progress["percent"], 0);
}
