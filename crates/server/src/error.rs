//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use vitrine_mirror::MirrorError;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error wrapping the mirror's terminal error kinds.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] pub MirrorError);

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match &self.0 {
            MirrorError::NotFound => "not_found",
            MirrorError::InvalidRequest(_) => "bad_request",
            MirrorError::UpstreamUnavailable(_) => "upstream_unavailable",
            MirrorError::ChecksumMismatch { .. } => "checksum_mismatch",
            MirrorError::StorageFailure(_) => "storage_failure",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match &self.0 {
            MirrorError::NotFound => StatusCode::NOT_FOUND,
            MirrorError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            MirrorError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            MirrorError::ChecksumMismatch { .. } => StatusCode::BAD_GATEWAY,
            MirrorError::StorageFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), reason = %self.0, "request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
