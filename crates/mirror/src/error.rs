//! Terminal error taxonomy surfaced to the boundary layer.

use crate::singleflight::FlightError;
use thiserror::Error;
use vitrine_index::IndexError;
use vitrine_store::StoreError;
use vitrine_upstream::UpstreamError;

/// The error kinds the request-handling layer maps to response codes.
///
/// Retry and backoff detail never escapes the upstream client, and
/// stale-serving fallback happens inside the mirror service, so the boundary
/// only ever sees these terminal kinds. Variants carry rendered messages
/// rather than sources so one result can be broadcast to every caller of a
/// collapsed fetch.
#[derive(Clone, Debug, Error)]
pub enum MirrorError {
    /// The key does not exist upstream. Definitive, and cached as a
    /// negative entry with its own short TTL.
    #[error("not found")]
    NotFound,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// The durable cache itself is unusable. Never masked behind stale
    /// data; the service is degraded and must say so.
    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl From<IndexError> for MirrorError {
    fn from(err: IndexError) -> Self {
        MirrorError::StorageFailure(err.to_string())
    }
}

impl From<StoreError> for MirrorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DigestMismatch { expected, actual } => {
                MirrorError::ChecksumMismatch { expected, actual }
            }
            other => MirrorError::StorageFailure(other.to_string()),
        }
    }
}

impl From<UpstreamError> for MirrorError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::NotFound { .. } => MirrorError::NotFound,
            UpstreamError::Rejected { status, url } => {
                MirrorError::InvalidRequest(format!("upstream rejected ({status}): {url}"))
            }
            UpstreamError::ChecksumMismatch {
                expected, actual, ..
            } => MirrorError::ChecksumMismatch { expected, actual },
            other => MirrorError::UpstreamUnavailable(other.to_string()),
        }
    }
}

impl From<FlightError<MirrorError>> for MirrorError {
    fn from(err: FlightError<MirrorError>) -> Self {
        match err {
            FlightError::Failed(inner) => inner,
            FlightError::LeaderCancelled => {
                MirrorError::UpstreamUnavailable("fetch was cancelled".to_string())
            }
        }
    }
}

/// Result type for mirror operations.
pub type MirrorResult<T> = std::result::Result<T, MirrorError>;
