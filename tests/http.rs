use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use collab_relay::config::Config;
use collab_relay::db::MemoryDocumentStore;
use collab_relay::routes::build_router;
use collab_relay::ws::Relay;
use collab_relay::AppState;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;

const SECRET: &str = "integration-secret";

fn app(config: Config) -> Router {
    let (relay, handle) = Relay::new(Arc::new(MemoryDocumentStore::new()));
    tokio::spawn(relay.run());
    build_router(AppState {
        relay: handle,
        config: Arc::new(config),
    })
}

fn secured() -> Config {
    Config {
        cloud_auth_jwt_secret: Some(SECRET.to_string()),
        ..Config::default()
    }
}

fn bearer(claims: Value) -> String {
    let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();
    format!("Bearer {token}")
}

fn exp() -> i64 {
    chrono::Utc::now().timestamp() + 300
}

async fn get(app: Router, uri: &str, authorization: Option<String>) -> (StatusCode, Value) {
    let mut request = Request::builder().uri(uri);
    if let Some(value) = authorization {
        request = request.header(header::AUTHORIZATION, value);
    }
    let response = app.oneshot(request.body(Body::empty()).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

#[tokio::test]
async fn health_and_ready() {
    let (status, body) = get(app(Config::default()), "/api/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "collab-relay");

    let (status, body) = get(app(Config::default()), "/api/v1/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "memory");
}

#[tokio::test]
async fn diagnostics_are_open_without_a_secret() {
    let (status, body) = get(app(Config::default()), "/api/v1/diagnostics", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["n_conn"], 0);
    assert_eq!(body["n_rooms"], 0);
}

#[tokio::test]
async fn diagnostics_require_a_service_token() {
    let (status, _) = get(app(secured()), "/api/v1/diagnostics", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let user = bearer(json!({"sub": "u1", "type": "user", "exp": exp()}));
    let (status, body) = get(app(secured()), "/api/v1/diagnostics", Some(user)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], 403);

    let service = bearer(json!({"sub": "ops", "type": "service", "exp": exp()}));
    let (status, body) = get(app(secured()), "/api/v1/diagnostics", Some(service)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "memory");
}

#[tokio::test]
async fn openapi_document_is_served() {
    let (status, body) = get(app(Config::default()), "/api-docs/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/v1/health"].is_object());
    assert!(body["paths"]["/api/v1/diagnostics"].is_object());
}
