use std::time::Instant;

use axum::Json;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::Environment;
use crate::error::ErrorDetail;

/// Log one line per request: `HTTP {method} {uri} {status} {ms}ms`.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = redact_secret(request.uri().path());
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status();
    let ms = started.elapsed().as_millis();
    if status.is_server_error() {
        error!("HTTP {method} {path} {} {ms}ms", status.as_u16());
    } else if status.is_client_error() {
        warn!("HTTP {method} {path} {} {ms}ms", status.as_u16());
    } else {
        info!("HTTP {method} {path} {} {ms}ms", status.as_u16());
    }

    response
}

/// In development, add the internal error text to 500 responses.
pub async fn expose_error_detail(
    State(environment): State<Environment>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    if environment != Environment::Development {
        return response;
    }

    match response.extensions_mut().remove::<ErrorDetail>() {
        Some(ErrorDetail(detail)) => (
            response.status(),
            Json(json!({ "message": "Internal Server Error", "detail": detail })),
        )
            .into_response(),
        None => response,
    }
}

/// Hide the secret segment of `/{id}/{secret}` paths.
fn redact_secret(path: &str) -> String {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        [id, secret] if !id.is_empty() && !secret.is_empty() => format!("/{id}/***"),
        _ => path.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_segment_is_redacted() {
        assert_eq!(redact_secret("/abc/s3cr3t"), "/abc/***");
    }

    #[test]
    fn other_paths_are_unchanged() {
        assert_eq!(redact_secret("/"), "/");
        assert_eq!(redact_secret("/abc"), "/abc");
        assert_eq!(redact_secret("/health-check"), "/health-check");
    }
}
