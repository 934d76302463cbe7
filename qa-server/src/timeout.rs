//! Whole-request deadline.

use crate::error::ApiError;
use axum::{
    extract::{Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use std::time::Duration;

/// Apply a request deadline to every route of `router`.
///
/// Expired requests get the regular JSON error body. Dropping the handler
/// future releases any per-user turn it was holding.
pub fn with_request_timeout(router: Router, limit: Duration) -> Router {
    router.layer(middleware::from_fn_with_state(limit, request_timeout))
}

async fn request_timeout(State(limit): State<Duration>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();

    match tokio::time::timeout(limit, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::error!(
                method = %method,
                path = %path,
                timeout_ms = limit.as_millis() as u64,
                "Request timed out"
            );
            ApiError::Timeout.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::routing::get;
    use tower::ServiceExt;

    fn app(limit: Duration) -> Router {
        let router = Router::new()
            .route("/fast", get(|| async { "ok" }))
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            );
        with_request_timeout(router, limit)
    }

    #[tokio::test]
    async fn test_slow_request_gets_json_error() {
        let response = app(Duration::from_millis(50))
            .oneshot(Request::builder().uri("/slow").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Request timed out");
        assert_eq!(json["code"], "REQUEST_TIMEOUT");
    }

    #[tokio::test]
    async fn test_fast_request_passes_through() {
        let response = app(Duration::from_secs(5))
            .oneshot(Request::builder().uri("/fast").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
