//! HTTP API routes.

use crate::error::ApiError;
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use qa_common::logging::trace_id_from_headers;
use qa_common::request_span;
use qa_session::ChatSessionManager;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::Instrument;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ChatSessionManager>,
}

impl AppState {
    pub fn new(manager: Arc<ChatSessionManager>) -> Self {
        Self { manager }
    }
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/chat", post(chat))
        .route("/end_chat", post(end_chat))
        .with_state(state)
}

/// Parse a request body without rejecting it.
///
/// Anything that is not a JSON object yields an empty object, so missing
/// fields surface as a validation error from the manager instead of an
/// extractor rejection.
fn lenient_body(body: &Bytes) -> Value {
    match serde_json::from_slice::<Value>(body) {
        Ok(value @ Value::Object(_)) => value,
        _ => Value::Object(Default::default()),
    }
}

fn str_field<'a>(body: &'a Value, name: &str) -> Option<&'a str> {
    body.get(name).and_then(Value::as_str)
}

// ============ Health Check ============

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "qa-server",
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": state.manager.active_sessions().await
    }))
}

// ============ Chat ============

#[derive(Debug, Serialize)]
struct ChatResponse {
    answer: String,
}

async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ChatResponse>, ApiError> {
    let body = lenient_body(&body);
    let user_id = str_field(&body, "user_id");
    let question = str_field(&body, "question");

    let trace_id = trace_id_from_headers(&headers);
    let span = request_span!("chat", trace_id, user_id = user_id.unwrap_or_default());

    async move {
        let reply = state.manager.chat(user_id, question).await?;
        Ok::<_, ApiError>(Json(ChatResponse {
            answer: reply.answer,
        }))
    }
    .instrument(span)
    .await
}

async fn end_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let body = lenient_body(&body);
    let user_id = str_field(&body, "user_id");

    let trace_id = trace_id_from_headers(&headers);
    let span = request_span!("end_chat", trace_id, user_id = user_id.unwrap_or_default());

    state.manager.end_chat(user_id).instrument(span).await?;

    Ok(Json(serde_json::json!({
        "message": "Chat ended successfully"
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use qa_session::{ManagerSettings, ObjectStore, ObjectStoreError, QaCapability, QaState, SnapshotStore};
    use std::path::Path;
    use tower::ServiceExt;

    struct EmptyStore;

    #[async_trait]
    impl ObjectStore for EmptyStore {
        fn name(&self) -> &str {
            "empty"
        }

        async fn download(&self, bucket: &str, key: &str, _dest: &Path) -> Result<(), ObjectStoreError> {
            Err(ObjectStoreError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })
        }
    }

    struct Fixed;

    #[async_trait]
    impl QaCapability for Fixed {
        async fn invoke(&self, state: QaState, _question: &str) -> anyhow::Result<(String, QaState)> {
            Ok(("fixed".to_string(), state))
        }
    }

    fn test_app(dir: &Path) -> Router {
        let manager = ChatSessionManager::new(
            ManagerSettings::default(),
            SnapshotStore::new(dir).unwrap(),
            Arc::new(EmptyStore),
            Arc::new(Fixed),
        );
        build_router(AppState::new(Arc::new(manager)))
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn test_lenient_body() {
        assert!(lenient_body(&Bytes::from_static(b"not json")).as_object().unwrap().is_empty());
        assert!(lenient_body(&Bytes::from_static(b"[1, 2]")).as_object().unwrap().is_empty());
        let body = lenient_body(&Bytes::from_static(br#"{"user_id": 7}"#));
        assert_eq!(str_field(&body, "user_id"), None);
    }

    #[tokio::test]
    async fn test_health_check() {
        let dir = tempfile::tempdir().unwrap();
        let response = test_app(dir.path())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["active_sessions"], 0);
    }

    #[tokio::test]
    async fn test_chat_missing_question() {
        let dir = tempfile::tempdir().unwrap();
        let response = test_app(dir.path())
            .oneshot(post_json("/chat", r#"{"user_id": "u1"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert_eq!(json["error"], "Missing user_id or question");
        assert_eq!(json["code"], "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_chat_malformed_body() {
        let dir = tempfile::tempdir().unwrap();
        let response = test_app(dir.path())
            .oneshot(post_json("/chat", "{oops"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_end_chat_unknown_user_ok() {
        let dir = tempfile::tempdir().unwrap();
        let response = test_app(dir.path())
            .oneshot(post_json("/end_chat", r#"{"user_id": "nobody"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["message"], "Chat ended successfully");
    }

    #[tokio::test]
    async fn test_end_chat_missing_user() {
        let dir = tempfile::tempdir().unwrap();
        let response = test_app(dir.path())
            .oneshot(post_json("/end_chat", "{}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"], "Missing user_id");
    }
}
