use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use zipstream::{StoreError, StreamError};

/// Errors returned by HTTP handlers, rendered as `{"message": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not Found")]
    NotFound,

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    UnsupportedProtocol(String),

    #[error("{0}")]
    Internal(String),
}

/// Internal error text attached to a 500 response. Only rendered to clients
/// in development; see [`crate::middleware::expose_error_detail`].
#[derive(Debug, Clone)]
pub struct ErrorDetail(pub String);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Validation(_) | Self::UnsupportedProtocol(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match self {
            Self::Internal(detail) => {
                tracing::error!(%detail, "request failed");
                let mut response = (
                    status,
                    Json(json!({ "message": "Internal Server Error" })),
                )
                    .into_response();
                response.extensions_mut().insert(ErrorDetail(detail));
                response
            }
            other => (status, Json(json!({ "message": other.to_string() }))).into_response(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound => Self::NotFound,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<StreamError> for ApiError {
    fn from(error: StreamError) -> Self {
        match error {
            StreamError::UnsupportedProtocol(e) => Self::UnsupportedProtocol(e.to_string()),
            e @ StreamError::InvalidSource { .. } => Self::Validation(e.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}
