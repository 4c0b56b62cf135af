//! HTTP error mapping
//!
//! Every pipeline error is converted to a status and a structured JSON body
//! at the handler boundary; raw I/O errors never reach a caller verbatim.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::error::TransferError;

/// API-facing error
#[derive(Debug)]
pub enum ApiError {
    /// Unknown session (404)
    NotFound(String),
    /// Duplicate stream registration (409)
    Conflict(String),
    /// Malformed request, e.g. no file part (400)
    BadRequest(String),
    /// Transfer failed mid-flight (500)
    Transfer(String),
}

impl From<TransferError> for ApiError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::ConnectionNotFound(_) => ApiError::NotFound(err.to_string()),
            TransferError::StreamConflict { .. } => ApiError::Conflict(err.to_string()),
            other => ApiError::Transfer(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::Transfer(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
