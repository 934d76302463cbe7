//! HTTP error mapping for qa-server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use qa_session::SessionError;
use serde::Serialize;

/// Error returned by route handlers and middleware.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The request outlived the server's request deadline.
    #[error("Request timed out")]
    Timeout,
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Session(e) => {
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::Timeout => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn body(&self) -> ErrorBody {
        match self {
            Self::Session(e) => ErrorBody {
                error: e.public_message(),
                code: e.code(),
            },
            Self::Timeout => ErrorBody {
                error: self.to_string(),
                code: "REQUEST_TIMEOUT",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), axum::Json(self.body())).into_response()
    }
}
