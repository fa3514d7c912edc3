//! In-memory object store for tests and local runs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{ObjectStore, ObjectSummary, StoreError};

#[derive(Debug, Clone, PartialEq)]
pub struct MemoryObject {
    pub data: Vec<u8>,
    pub content_type: Option<String>,
    pub last_modified: DateTime<Utc>,
}

type ObjectMap = BTreeMap<(String, String), MemoryObject>;

/// Buckets and objects held in a sorted map keyed by `(bucket, key)`.
///
/// `set_available(false)` makes every call fail as if the endpoint could not
/// be reached; `fail_writes(true)` makes puts and copies fail.
#[derive(Debug)]
pub struct InMemoryObjectStore {
    objects: Mutex<ObjectMap>,
    available: AtomicBool,
    writes_fail: AtomicBool,
}

impl Default for InMemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            writes_fail: AtomicBool::new(false),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.writes_fail.store(fail, Ordering::SeqCst);
    }

    pub fn insert(&self, bucket: &str, key: &str, data: Vec<u8>) {
        self.lock().insert(
            (bucket.to_string(), key.to_string()),
            MemoryObject {
                data,
                content_type: None,
                last_modified: Utc::now(),
            },
        );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<MemoryObject> {
        self.lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.object(bucket, key).is_some()
    }

    /// All keys of `bucket`, sorted
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.lock()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, key)| key.clone())
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, ObjectMap> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::StorageUnavailable(
                "in-memory store is offline".to_string(),
            ))
        }
    }

    fn ensure_writable(&self, key: &str) -> Result<(), StoreError> {
        self.ensure_available()?;
        if self.writes_fail.load(Ordering::SeqCst) {
            return Err(StoreError::WriteFailed {
                key: key.to_string(),
                reason: "writes disabled".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>, StoreError> {
        self.ensure_available()?;

        Ok(self
            .lock()
            .iter()
            .filter(|((b, key), _)| b == bucket && key.starts_with(prefix))
            .map(|((_, key), object)| ObjectSummary {
                key: key.clone(),
                size: object.data.len() as i64,
                last_modified: Some(object.last_modified),
            })
            .collect())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        self.ensure_available()?;

        self.object(bucket, key)
            .map(|object| object.data)
            .ok_or_else(|| StoreError::NotFound(format!("s3://{}/{}", bucket, key)))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StoreError> {
        self.ensure_writable(key)?;

        self.lock().insert(
            (bucket.to_string(), key.to_string()),
            MemoryObject {
                data: body,
                content_type: content_type.map(str::to_string),
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn copy(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> Result<(), StoreError> {
        self.ensure_writable(dest_key)?;

        let mut objects = self.lock();
        let mut object = objects
            .get(&(source_bucket.to_string(), source_key.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("s3://{}/{}", source_bucket, source_key)))?;
        object.last_modified = Utc::now();
        objects.insert((dest_bucket.to_string(), dest_key.to_string()), object);
        Ok(())
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.ensure_available()?;

        self.lock().remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}
