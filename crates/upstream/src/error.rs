//! Upstream client error types.

use thiserror::Error;

/// Errors from the upstream registry client.
///
/// Transient failures are retried internally before `Unavailable` is
/// surfaced; everything else is definitive for the attempt. Malformed
/// responses are deliberately distinct from network failures so callers can
/// decide whether stale data is an acceptable substitute.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("not found upstream: {url}")]
    NotFound { url: String },

    #[error("upstream rejected request with status {status}: {url}")]
    Rejected { status: u16, url: String },

    #[error("upstream unavailable after {attempts} attempts: {reason}")]
    Unavailable { attempts: u32, reason: String },

    #[error("malformed response from {url}")]
    Malformed {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("response from {url} exceeded limit of {limit} bytes")]
    TooLarge { url: String, limit: usize },

    #[error("checksum mismatch for {url}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("terraform providers service not supported by {hostname}")]
    ServiceNotSupported { hostname: String },

    #[error("could not build registry URL for {hostname}: {reason}")]
    BuildUrl { hostname: String, reason: String },

    #[error("http client error: {0}")]
    Client(String),
}

/// Result type for upstream operations.
pub type UpstreamResult<T> = std::result::Result<T, UpstreamError>;
