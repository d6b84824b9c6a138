//! The informational HTTP surface.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use coedit_server::{build_state, router, ServerConfig};
use tower::ServiceExt;

async fn get(app: axum::Router, uri: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_server_state() {
    let state = build_state(ServerConfig::default()).await.unwrap();
    let app = router(state);

    let (status, body) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connectedClients"], 0);
    assert_eq!(body["activeDocuments"], 0);
    assert_eq!(body["totalOperations"], 0);
    assert!(body["timestamp"].as_i64().unwrap() > 0);
    assert!(body["uptime"].as_u64().is_some());
}

#[tokio::test]
async fn documents_listing_starts_empty() {
    let state = build_state(ServerConfig::default()).await.unwrap();
    let app = router(state);

    let (status, body) = get(app, "/documents").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, serde_json::json!([]));
}

#[tokio::test]
async fn unknown_document_is_not_found() {
    let state = build_state(ServerConfig::default()).await.unwrap();
    let app = router(state);

    let (status, _) = get(app.clone(), "/documents/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Invalid ids are a client error, not a lookup miss.
    let (status, _) = get(app, "/documents/bad%20id").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
