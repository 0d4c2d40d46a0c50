//! In-memory ObjectStore for tests that need deterministic timestamps.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Mutex;
use time::OffsetDateTime;
use vitrine_store::{ObjectMeta, ObjectStore, StoreError, StoreResult};

struct Object {
    data: Bytes,
    last_modified: OffsetDateTime,
}

/// In-memory backend with controllable modification times.
#[derive(Default)]
pub struct MemoryBackend {
    objects: Mutex<BTreeMap<String, Object>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plant a modification time for an existing object.
    pub fn set_modified(&self, key: &str, at: OffsetDateTime) {
        let mut objects = self.objects.lock().unwrap();
        if let Some(object) = objects.get_mut(key) {
            object.last_modified = at;
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryBackend {
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn head(&self, key: &str) -> StoreResult<ObjectMeta> {
        let objects = self.objects.lock().unwrap();
        let object = objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Ok(ObjectMeta {
            size: object.data.len() as u64,
            last_modified: Some(object.last_modified),
        })
    }

    async fn get(&self, key: &str) -> StoreResult<Bytes> {
        let objects = self.objects.lock().unwrap();
        let object = objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        Ok(object.data.clone())
    }

    async fn put(&self, key: &str, data: Bytes) -> StoreResult<()> {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            Object {
                data,
                last_modified: OffsetDateTime::now_utc(),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
