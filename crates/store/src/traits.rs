//! Storage trait definitions.

use crate::error::StoreResult;
use async_trait::async_trait;
use bytes::Bytes;

/// Object store abstraction behind the content-addressed artifact layer.
///
/// `put` is atomic with respect to readers: a partially written object is
/// never visible under its key. Backends either rename a completed temp file
/// into place or rely on the remote store's atomic single-object PUT.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Check if an object exists.
    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Get an object's metadata without fetching content.
    async fn head(&self, key: &str) -> StoreResult<ObjectMeta>;

    /// Get an object's content.
    async fn get(&self, key: &str) -> StoreResult<Bytes>;

    /// Put an object atomically.
    async fn put(&self, key: &str, data: Bytes) -> StoreResult<()>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// List object keys under a prefix.
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Static identifier for the backend type, for logging.
    fn backend_name(&self) -> &'static str;

    /// Verify backend connectivity. The default suits backends with nothing
    /// to probe.
    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Metadata about a stored object.
#[derive(Clone, Debug)]
pub struct ObjectMeta {
    /// Object size in bytes.
    pub size: u64,
    /// Last modification time, if the backend tracks one.
    pub last_modified: Option<time::OffsetDateTime>,
}
