//! HTTP surface
//!
//! File-transfer endpoints consumed by the web front-end, plus a liveness
//! probe. Transfers are driven against the control channel of the session
//! named in the path; the registry is the only shared state.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use chrono::Utc;
use futures_util::StreamExt;
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::config::GatewayConfig;
use super::error::ApiError;
use super::tunnel;
use crate::error::TransferError;
use crate::recording::RecordingPipeline;
use crate::registry::ConnectionRegistry;
use crate::transfer::{self, DownloadStart};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    /// Live sessions
    pub registry: Arc<ConnectionRegistry>,
    /// Recording job executor, when object storage is configured
    pub recorder: Option<Arc<RecordingPipeline>>,
    /// Gateway configuration
    pub config: Arc<GatewayConfig>,
}

/// Build the gateway router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/tunnels/:session_id/streams/:stream_index/:filename",
            get(download_file).post(upload_file),
        )
        .route("/ws", get(tunnel::ws_handler))
        // Uploads are re-chunked and streamed, never buffered whole; the
        // framework's request size ceiling would cap them at 2 MiB.
        .layer(DefaultBodyLimit::disable())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
    filename: String,
    size: u64,
    chunks: u64,
}

/// `POST /api/tunnels/{session}/streams/{index}/{filename}`
///
/// Multipart body; the first part carrying a filename is the payload.
async fn upload_file(
    State(state): State<AppState>,
    Path((session_id, stream_index, filename)): Path<(String, String, String)>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.file_name().is_none() {
            continue;
        }

        let source = Box::pin(futures_util::stream::try_unfold(field, |mut field| async move {
            match field.chunk().await {
                Ok(Some(chunk)) => Ok(Some((chunk, field))),
                Ok(None) => Ok(None),
                Err(e) => Err(TransferError::Source(e.to_string())),
            }
        }));

        let report = transfer::upload(
            &state.registry,
            &session_id,
            &stream_index,
            &filename,
            state.config.chunk_size,
            source,
        )
        .await?;

        return Ok(Json(UploadResponse {
            success: true,
            filename,
            size: report.bytes_sent,
            chunks: report.chunk_count,
        }));
    }

    Err(ApiError::BadRequest("no file part in request".into()))
}

/// `GET /api/tunnels/{session}/streams/{index}/{filename}`
///
/// Streams the daemon's blobs as they arrive. Headers are committed on the
/// first byte; a later failure terminates the body abruptly, while a
/// failure before the first byte still gets a structured error response.
async fn download_file(
    State(state): State<AppState>,
    Path((session_id, stream_index, filename)): Path<(String, String, String)>,
) -> Result<Response, ApiError> {
    let pending = transfer::begin_download(
        &state.registry,
        &session_id,
        &stream_index,
        &filename,
        state.config.download_queue,
    )
    .await?;

    match pending.first_event().await {
        DownloadStart::Failed(err) => Err(err.into()),
        DownloadStart::Empty => Ok((attachment_headers(&filename), Body::empty()).into_response()),
        DownloadStart::Data(first, rx) => {
            let rest = ReceiverStream::new(rx);
            let body = futures_util::stream::once(async move { Ok::<Bytes, TransferError>(first) })
                .chain(rest);
            Ok((attachment_headers(&filename), Body::from_stream(body)).into_response())
        }
    }
}

fn attachment_headers(filename: &str) -> [(header::HeaderName, String); 2] {
    [
        (
            header::CONTENT_TYPE,
            "application/octet-stream".to_owned(),
        ),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", sanitize_filename(filename)),
        ),
    ]
}

/// Strip characters that would break out of a quoted header value
fn sanitize_filename(filename: &str) -> String {
    filename
        .chars()
        .map(|c| {
            if c == '"' || c == '\\' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect()
}
