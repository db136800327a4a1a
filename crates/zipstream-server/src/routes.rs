use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use futures::StreamExt;
use tracing::info_span;
use zipstream::{ArchiveChunk, BundleId, FileReference};

use crate::error::ApiError;
use crate::middleware::{expose_error_detail, log_requests};
use crate::state::AppState;
use crate::validation;

/// Build the HTTP router.
///
/// Every path answers unknown methods with the same 404 body as unknown
/// paths.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health-check", get(health_check).fallback(not_found))
        .route("/", post(create_bundle).fallback(not_found))
        .route("/bundle", post(download_files).fallback(not_found))
        .route("/{id}", get(download_bundle).fallback(not_found))
        .route(
            "/{id}/{secret}",
            get(read_bundle)
                .put(update_bundle)
                .delete(delete_bundle)
                .fallback(not_found),
        )
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(
            state.environment,
            expose_error_detail,
        ))
        .layer(middleware::from_fn(log_requests))
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

async fn not_found() -> ApiError {
    ApiError::NotFound
}

async fn create_bundle(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request = validation::create_request(&body)?;
    let bundle = state.store.create(request).await?;
    Ok((StatusCode::CREATED, Json(bundle)))
}

async fn download_files(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let (filename, files) = validation::download_request(&body)?;
    stream_archive(&state, "ad-hoc", filename, &files).await
}

async fn download_bundle(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let bundle = state.store.read(&BundleId::new(id), None).await?;
    stream_archive(&state, bundle.id.as_str(), bundle.filename, &bundle.files).await
}

async fn read_bundle(
    State(state): State<AppState>,
    Path((id, secret)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let bundle = state.store.read(&BundleId::new(id), Some(&secret)).await?;
    Ok(Json(bundle))
}

async fn update_bundle(
    State(state): State<AppState>,
    Path((id, secret)): Path<(String, String)>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let files = validation::append_request(&body)?;
    let bundle = state
        .store
        .update(&BundleId::new(id), &secret, files)
        .await?;
    Ok(Json(bundle))
}

async fn delete_bundle(
    State(state): State<AppState>,
    Path((id, secret)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let bundle = state.store.delete(&BundleId::new(id), &secret).await?;
    Ok(Json(bundle))
}

/// Start streaming `files` and commit to a 200 response only once the first
/// archive bytes exist. Failures before that point become a normal error
/// response; failures after it abort the connection mid-body.
async fn stream_archive(
    state: &AppState,
    bundle: &str,
    filename: String,
    files: &[FileReference],
) -> Result<Response, ApiError> {
    let prepared = state.streamer.prepare(&filename, files)?;
    let span = info_span!("bundle", id = %bundle, entries = prepared.len());
    let (mut receiver, handle) = span.in_scope(|| state.streamer.spawn(prepared));

    let first = match receiver.recv().await {
        Some(Ok(chunk)) => chunk,
        Some(Err(e)) => return Err(ApiError::Internal(e.to_string())),
        None => {
            return match handle.await {
                Ok(Err(e)) => Err(e.into()),
                Ok(Ok(_)) => Err(ApiError::Internal("archive produced no output".into())),
                Err(e) => Err(ApiError::Internal(format!("streaming task failed: {e}"))),
            };
        }
    };

    let body = futures::stream::once(async move { ArchiveChunk::Ok(first) })
        .chain(receiver.into_stream());

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(header::CONTENT_DISPOSITION, content_disposition(&filename))
        .body(Body::from_stream(body))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// `attachment; filename="..."`, with characters that cannot appear in a
/// quoted header value replaced.
fn content_disposition(filename: &str) -> HeaderValue {
    if filename.is_empty() {
        return HeaderValue::from_static("attachment");
    }

    let safe: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii_graphic() || c == ' ' => c,
            _ => '_',
        })
        .collect();

    HeaderValue::from_str(&format!("attachment; filename=\"{safe}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
