//! Local filesystem storage backend.

use crate::error::{StoreError, StoreResult};
use crate::traits::{ObjectMeta, ObjectStore};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::instrument;
use uuid::Uuid;

/// Directory under the root for in-progress writes, renamed into place on
/// completion. Lives on the same filesystem so the rename is atomic.
const TMP_DIR: &str = "tmp";

/// Local filesystem object store.
pub struct FilesystemBackend {
    root: PathBuf,
}

impl FilesystemBackend {
    /// Create a new filesystem backend rooted at `root`.
    pub async fn new(root: impl AsRef<Path>) -> StoreResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(TMP_DIR)).await?;
        Ok(Self { root })
    }

    /// Resolve the path for a key, rejecting anything that could escape the
    /// storage root. Keys are internally generated, so this only has to stop
    /// mistakes, not adversaries with filesystem access.
    fn key_path(&self, key: &str) -> StoreResult<PathBuf> {
        if key.is_empty() || key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
            return Err(StoreError::InvalidKey(format!(
                "path traversal not allowed: {key}"
            )));
        }
        for component in Path::new(key).components() {
            match component {
                std::path::Component::Normal(_) => {}
                _ => {
                    return Err(StoreError::InvalidKey(format!(
                        "contains unsafe path component: {key}"
                    )));
                }
            }
        }
        Ok(self.root.join(key))
    }

    fn relative_key(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let mut key = String::new();
        for component in rel.components() {
            if !key.is_empty() {
                key.push('/');
            }
            key.push_str(component.as_os_str().to_str()?);
        }
        Some(key)
    }
}

fn map_io(err: std::io::Error, key: &str) -> StoreError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(key.to_string())
    } else {
        StoreError::Io(err)
    }
}

#[async_trait]
impl ObjectStore for FilesystemBackend {
    #[instrument(skip(self))]
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let path = self.key_path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    #[instrument(skip(self))]
    async fn head(&self, key: &str) -> StoreResult<ObjectMeta> {
        let path = self.key_path(key)?;
        let meta = fs::metadata(&path).await.map_err(|e| map_io(e, key))?;
        Ok(ObjectMeta {
            size: meta.len(),
            last_modified: meta.modified().ok().map(time::OffsetDateTime::from),
        })
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        let path = self.key_path(key)?;
        let data = fs::read(&path).await.map_err(|e| map_io(e, key))?;
        Ok(Bytes::from(data))
    }

    #[instrument(skip(self, data), fields(len = data.len()))]
    async fn put(&self, key: &str, data: Bytes) -> StoreResult<()> {
        let path = self.key_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to a temp file in the same tree, then rename into place so a
        // reader can never observe a partial object under the final key.
        let tmp = self.root.join(TMP_DIR).join(Uuid::new_v4().to_string());
        fs::write(&tmp, &data).await?;
        if let Err(err) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StoreError::Io(err));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: &str) -> StoreResult<()> {
        let path = self.key_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    #[instrument(skip(self))]
    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => continue,
                Err(err) => return Err(StoreError::Io(err)),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    if path != self.root.join(TMP_DIR) {
                        stack.push(path);
                    }
                } else if let Some(key) = self.relative_key(&path) {
                    if key.starts_with(prefix) {
                        keys.push(key);
                    }
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}
