//! Durable cache index for the vitrine provider mirror.
//!
//! Maps logical request keys to cached registry documents plus freshness
//! metadata. The index is a cache, not memory-only state: it survives
//! restarts, backed by SQLite. Entries are replaced wholesale on refresh so
//! readers never observe a partially updated record.

pub mod error;
pub mod models;
pub mod sqlite;

pub use error::{IndexError, IndexResult};
pub use models::{Freshness, IndexRecord, VersionRecord};
pub use sqlite::SqliteIndex;

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use url::Url;
use vitrine_core::registry::{ProviderVersions, VersionMetadata};
use vitrine_core::{ArtifactDigest, ProviderKey, VersionKey};

/// Cache index contract.
///
/// `put_*` calls replace the mapping for a key atomically; `get_*` calls
/// return the whole record or nothing. Negative records cache upstream 404s
/// under the same keys with their own TTL.
#[async_trait]
pub trait CacheIndex: Send + Sync {
    async fn get_index(&self, key: &ProviderKey) -> IndexResult<Option<IndexRecord>>;

    async fn put_index(
        &self,
        key: &ProviderKey,
        document: &ProviderVersions,
        fetched_at: i64,
    ) -> IndexResult<()>;

    async fn put_index_negative(&self, key: &ProviderKey, fetched_at: i64) -> IndexResult<()>;

    async fn invalidate_index(&self, key: &ProviderKey) -> IndexResult<()>;

    async fn get_version(&self, key: &VersionKey) -> IndexResult<Option<VersionRecord>>;

    /// Store a version entry and, in the same transaction, the upstream
    /// source URL for every archive it references, so artifact requests can
    /// later resolve a lazy download.
    async fn put_version(
        &self,
        key: &VersionKey,
        document: &VersionMetadata,
        fetched_at: i64,
    ) -> IndexResult<()>;

    async fn put_version_negative(&self, key: &VersionKey, fetched_at: i64) -> IndexResult<()>;

    async fn invalidate_version(&self, key: &VersionKey) -> IndexResult<()>;

    /// Resolve the upstream URL an artifact digest was advertised under.
    async fn artifact_source(&self, digest: &ArtifactDigest) -> IndexResult<Option<Url>>;

    /// Digests referenced by version entries that are still live (positive
    /// and within `version_ttl_secs` of `now`). The eviction sweep must not
    /// delete these.
    async fn live_digests(
        &self,
        version_ttl_secs: i64,
        now: i64,
    ) -> IndexResult<HashSet<ArtifactDigest>>;

    /// Check index connectivity and health.
    async fn health_check(&self) -> IndexResult<()>;
}

/// Open the SQLite-backed index at the configured path.
pub async fn from_path(path: impl AsRef<Path>) -> IndexResult<Arc<dyn CacheIndex>> {
    let index = SqliteIndex::new(path).await?;
    Ok(Arc::new(index) as Arc<dyn CacheIndex>)
}
