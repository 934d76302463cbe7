//! Integration tests for qa-server.
//!
//! Runs the router against real HTTP object store and QA backends served by
//! wiremock.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use qa_common::config::Config;
use qa_server::{build_router, AppState};
use qa_session::{build_object_store, ChatSessionManager, HttpQaCapability, ManagerSettings, SnapshotStore};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct TestApp {
    router: axum::Router,
    manager: Arc<ChatSessionManager>,
    _snapshots: tempfile::TempDir,
}

async fn test_app(objects: &MockServer, qa: &MockServer) -> TestApp {
    let snapshots = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.object_store.endpoint = Some(objects.uri());
    config.object_store.timeout_secs = 5;

    let manager = Arc::new(ChatSessionManager::new(
        ManagerSettings::from_config(&config),
        SnapshotStore::new(snapshots.path()).unwrap(),
        build_object_store(&config.object_store).unwrap(),
        Arc::new(HttpQaCapability::new(
            format!("{}/invoke", qa.uri()),
            None,
            Duration::from_secs(5),
        )),
    ));

    TestApp {
        router: build_router(AppState::new(Arc::clone(&manager))),
        manager,
        _snapshots: snapshots,
    }
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_full_chat_flow() {
    let objects = MockServer::start().await;
    let qa = MockServer::start().await;

    // Remote blob is only fetched once; the second turn is served from cache.
    Mock::given(method("GET"))
        .and(path("/qa-sessions/search-results-clean/u1/u1.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "turn": 0 })))
        .expect(1)
        .mount(&objects)
        .await;

    Mock::given(method("POST"))
        .and(path("/invoke"))
        .and(body_partial_json(json!({ "state": { "turn": 0 } })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "answer": "A1", "state": { "turn": 1 } })),
        )
        .expect(1)
        .mount(&qa)
        .await;
    Mock::given(method("POST"))
        .and(path("/invoke"))
        .and(body_partial_json(json!({ "state": { "turn": 1 } })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "answer": "A2", "state": { "turn": 2 } })),
        )
        .expect(1)
        .mount(&qa)
        .await;

    let app = test_app(&objects, &qa).await;

    // 1. First question: remote fetch
    let response = app
        .router
        .clone()
        .oneshot(post_json("/chat", json!({ "user_id": "u1", "question": "What is X?" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["answer"], "A1");

    // 2. Second question: cache hit
    let response = app
        .router
        .clone()
        .oneshot(post_json("/chat", json!({ "user_id": "u1", "question": "And Y?" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["answer"], "A2");

    // 3. Health reports the live session
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(read_json(response).await["active_sessions"], 1);

    // 4. End chat
    let response = app
        .router
        .clone()
        .oneshot(post_json("/end_chat", json!({ "user_id": "u1" })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["message"], "Chat ended successfully");

    assert_eq!(app.manager.active_sessions().await, 0);
    assert!(!app.manager.snapshots().exists("u1").await);
}

#[tokio::test]
async fn test_unknown_user_returns_404() {
    let objects = MockServer::start().await;
    let qa = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&objects)
        .await;

    let app = test_app(&objects, &qa).await;
    let response = app
        .router
        .oneshot(post_json("/chat", json!({ "user_id": "ghost", "question": "hi" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = read_json(response).await;
    assert_eq!(json["code"], "NO_SESSION_FOUND");
    assert_eq!(json["error"], "No chat session found for this user_id");
}

#[tokio::test]
async fn test_missing_user_id_returns_400() {
    let objects = MockServer::start().await;
    let qa = MockServer::start().await;

    let app = test_app(&objects, &qa).await;
    let response = app
        .router
        .oneshot(post_json("/chat", json!({ "question": "hi" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await["error"], "Missing user_id or question");
}

#[tokio::test]
async fn test_storage_outage_returns_500() {
    let objects = MockServer::start().await;
    let qa = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&objects)
        .await;

    let app = test_app(&objects, &qa).await;
    let response = app
        .router
        .oneshot(post_json("/chat", json!({ "user_id": "u1", "question": "hi" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(read_json(response).await["code"], "UPSTREAM_UNAVAILABLE");
}

#[tokio::test]
async fn test_qa_failure_returns_500() {
    let objects = MockServer::start().await;
    let qa = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "turn": 0 })))
        .mount(&objects)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("traceback: secret"))
        .mount(&qa)
        .await;

    let app = test_app(&objects, &qa).await;
    let response = app
        .router
        .oneshot(post_json("/chat", json!({ "user_id": "u1", "question": "hi" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = read_json(response).await;
    assert_eq!(json["code"], "PROCESSING_ERROR");
    assert!(!json["error"].as_str().unwrap().contains("secret"));
    assert!(!app.manager.cache().is_live("u1").await);
}
