//! Content-addressed artifact storage for the vitrine provider mirror.
//!
//! This crate provides:
//! - An `ObjectStore` abstraction with filesystem and S3 backends
//! - The `ArtifactStore` layer that addresses objects by the SHA-256 of
//!   their content, verifies expected digests before anything is stored,
//!   and deduplicates identical archives across providers
//! - An eviction sweep bounded by total bytes that never touches artifacts
//!   referenced by live cache index entries

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use backends::s3::S3Backend;
pub use error::{StoreError, StoreResult};
pub use traits::{ObjectMeta, ObjectStore};

use bytes::Bytes;
use std::collections::HashSet;
use std::sync::Arc;
use vitrine_core::config::StorageConfig;
use vitrine_core::ArtifactDigest;

/// Key prefix for stored artifacts.
const ARTIFACT_PREFIX: &str = "artifacts/";

/// Create an object store from configuration.
pub async fn from_config(config: &StorageConfig) -> StoreResult<Arc<dyn ObjectStore>> {
    config
        .validate()
        .map_err(|e| StoreError::Config(e.to_string()))?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            prefix,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(
                bucket,
                endpoint.clone(),
                region.clone(),
                prefix.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}

/// Statistics from one eviction sweep.
#[derive(Clone, Copy, Debug, Default)]
pub struct SweepStats {
    pub scanned: usize,
    pub total_bytes: u64,
    pub evicted: usize,
    pub evicted_bytes: u64,
}

/// Content-addressed artifact store.
///
/// The digest is always computed from the bytes, never supplied by the
/// caller, so identical content maps to one record no matter which provider
/// referenced it.
#[derive(Clone)]
pub struct ArtifactStore {
    backend: Arc<dyn ObjectStore>,
}

impl ArtifactStore {
    pub fn new(backend: Arc<dyn ObjectStore>) -> Self {
        Self { backend }
    }

    fn object_key(digest: &ArtifactDigest) -> String {
        let hex = digest.to_hex();
        format!("{ARTIFACT_PREFIX}{}/{hex}", &hex[..2])
    }

    fn digest_from_key(key: &str) -> Option<ArtifactDigest> {
        let hex = key.rsplit('/').next()?;
        ArtifactDigest::from_hex(hex).ok()
    }

    /// Store bytes under their computed digest. Identical content is stored
    /// once; re-putting existing content is a no-op.
    pub async fn put(&self, data: Bytes) -> StoreResult<ArtifactDigest> {
        let digest = ArtifactDigest::compute(&data);
        let key = Self::object_key(&digest);
        if self.backend.exists(&key).await? {
            tracing::debug!(%digest, "artifact already stored, deduplicated");
            return Ok(digest);
        }
        self.backend.put(&key, data).await?;
        tracing::debug!(%digest, "artifact stored");
        Ok(digest)
    }

    /// Store bytes that must hash to `expected`. On mismatch nothing is
    /// stored under either digest and the fetch that produced the bytes has
    /// failed.
    pub async fn put_verified(
        &self,
        data: Bytes,
        expected: &ArtifactDigest,
    ) -> StoreResult<ArtifactDigest> {
        let actual = ArtifactDigest::compute(&data);
        if actual != *expected {
            return Err(StoreError::DigestMismatch {
                expected: expected.to_hex(),
                actual: actual.to_hex(),
            });
        }
        self.put(data).await
    }

    /// Get artifact bytes by digest.
    pub async fn get(&self, digest: &ArtifactDigest) -> StoreResult<Bytes> {
        self.backend.get(&Self::object_key(digest)).await
    }

    /// Check whether an artifact is stored.
    pub async fn has(&self, digest: &ArtifactDigest) -> StoreResult<bool> {
        self.backend.exists(&Self::object_key(digest)).await
    }

    /// Evict least-recently-modified artifacts until total size is within
    /// `max_total_bytes`. Artifacts in `live` are never deleted regardless
    /// of age; records are rebuilt from the backend listing each sweep.
    pub async fn sweep(
        &self,
        max_total_bytes: u64,
        live: &HashSet<ArtifactDigest>,
    ) -> StoreResult<SweepStats> {
        struct Candidate {
            key: String,
            digest: ArtifactDigest,
            size: u64,
            last_modified: Option<time::OffsetDateTime>,
        }

        let keys = self.backend.list(ARTIFACT_PREFIX).await?;
        let mut candidates = Vec::with_capacity(keys.len());
        let mut stats = SweepStats::default();

        for key in keys {
            let Some(digest) = Self::digest_from_key(&key) else {
                continue;
            };
            let meta = match self.backend.head(&key).await {
                Ok(meta) => meta,
                // Deleted between list and head; skip.
                Err(StoreError::NotFound(_)) => continue,
                Err(err) => return Err(err),
            };
            stats.scanned += 1;
            stats.total_bytes += meta.size;
            candidates.push(Candidate {
                key,
                digest,
                size: meta.size,
                last_modified: meta.last_modified,
            });
        }

        if stats.total_bytes <= max_total_bytes {
            return Ok(stats);
        }

        candidates.retain(|c| !live.contains(&c.digest));
        // Unknown modification time sorts first and is evicted first.
        candidates.sort_by_key(|c| c.last_modified);

        let mut remaining = stats.total_bytes;
        for candidate in candidates {
            if remaining <= max_total_bytes {
                break;
            }
            self.backend.delete(&candidate.key).await?;
            remaining -= candidate.size;
            stats.evicted += 1;
            stats.evicted_bytes += candidate.size;
            tracing::debug!(digest = %candidate.digest, size = candidate.size, "artifact evicted");
        }

        tracing::info!(
            scanned = stats.scanned,
            total_bytes = stats.total_bytes,
            evicted = stats.evicted,
            evicted_bytes = stats.evicted_bytes,
            "eviction sweep finished"
        );
        Ok(stats)
    }

    /// Verify the backing store is reachable.
    pub async fn health_check(&self) -> StoreResult<()> {
        self.backend.health_check().await
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }
}
