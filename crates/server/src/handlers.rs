//! Request handlers for the provider mirror protocol.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use vitrine_core::{ArtifactDigest, ProviderKey, VersionKey};
use vitrine_mirror::MirrorError;

/// The `<version>.json` path segment of a mirror version request.
#[derive(Debug, Deserialize)]
#[serde(try_from = "String")]
pub struct VersionFile {
    version: String,
}

impl TryFrom<String> for VersionFile {
    type Error = String;

    fn try_from(value: String) -> Result<Self, String> {
        match value.strip_suffix(".json") {
            Some(version) if !version.is_empty() => Ok(VersionFile {
                version: version.to_string(),
            }),
            _ => Err(format!("expected <version>.json, got {value:?}")),
        }
    }
}

fn provider_key(
    hostname: String,
    namespace: String,
    provider_type: String,
) -> ApiResult<ProviderKey> {
    ProviderKey::new(hostname, namespace, provider_type)
        .map_err(|e| ApiError(MirrorError::InvalidRequest(e.to_string())))
}

/// `GET /{hostname}/{namespace}/{provider_type}/index.json`
///
/// Safe to cache: providers are never deleted upstream, so a stale version
/// list only ever under-reports, and the per-version endpoint still resolves.
pub async fn index_handler(
    State(state): State<AppState>,
    Path((hostname, namespace, provider_type)): Path<(String, String, String)>,
) -> ApiResult<impl IntoResponse> {
    let key = provider_key(hostname, namespace, provider_type)?;
    let index = state.mirror.get_index(&key).await.map_err(ApiError)?;
    Ok((
        [(header::CACHE_CONTROL, "public, max-age=60")],
        Json(index),
    ))
}

/// `GET /{hostname}/{namespace}/{provider_type}/{version}.json`
///
/// No Cache-Control here: a cached version document could advertise archives
/// this instance has not yet recorded sources for.
pub async fn version_handler(
    State(state): State<AppState>,
    Path((hostname, namespace, provider_type, file)): Path<(String, String, String, VersionFile)>,
) -> ApiResult<impl IntoResponse> {
    let provider = provider_key(hostname, namespace, provider_type)?;
    let key = VersionKey::new(provider, file.version)
        .map_err(|e| ApiError(MirrorError::InvalidRequest(e.to_string())))?;
    let version = state.mirror.get_version(&key).await.map_err(ApiError)?;
    Ok(Json(version))
}

/// `GET /artifacts/{digest}`
pub async fn artifact_handler(
    State(state): State<AppState>,
    Path(digest): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let digest = ArtifactDigest::from_hex(&digest)
        .map_err(|e| ApiError(MirrorError::InvalidRequest(e.to_string())))?;
    let bytes = state.mirror.get_artifact(&digest).await.map_err(ApiError)?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    ))
}

/// `GET /healthcheck`
///
/// Unauthenticated, for load balancer probes. Healthy means the cache index
/// and artifact store are both usable.
pub async fn healthcheck(State(state): State<AppState>) -> impl IntoResponse {
    match state.mirror.health_check().await {
        Ok(()) => (StatusCode::OK, "ok"),
        Err(err) => {
            tracing::warn!(reason = %err, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_file_strips_json_suffix() {
        let file = VersionFile::try_from("5.0.0.json".to_string()).unwrap();
        assert_eq!(file.version, "5.0.0");
    }

    #[test]
    fn version_file_rejects_bare_versions() {
        assert!(VersionFile::try_from("5.0.0".to_string()).is_err());
        assert!(VersionFile::try_from(".json".to_string()).is_err());
    }
}
