//! Object storage
//!
//! [`ObjectStore`] is the low-level seam (S3 in production, memory in tests
//! and local runs). [`ObjectStoreAdapter`] binds a store to one bucket and
//! owning account and exposes the operations the stages need, including
//! [`ExtractCapability`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument};

use crate::capability::{compile_mask, matches_mask, Context, ExtractCapability, ExtractError};

pub mod config;
pub mod handle;
pub mod memory;
pub mod s3;

pub use handle::{FetchedDataset, PayloadDataset, StoredObject};
pub use memory::InMemoryObjectStore;
pub use s3::S3ObjectStore;

pub const JSON_CONTENT_TYPE: &str = "application/json";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Object storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Failed to write {key}: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("Unsupported storage operation: {0}")]
    UnsupportedOperation(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage request failed: {0}")]
    Request(String),

    #[error("Failed to serialize object body: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Address of an object, with the account that owns its bucket when known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
    pub account_id: Option<String>,
}

impl ObjectLocation {
    pub fn basename(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }

    pub fn uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Every object whose key starts with `prefix`
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>, StoreError>;

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError>;

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Server-side copy
    async fn copy(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> Result<(), StoreError>;

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct ObjectStoreAdapter {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    account_id: Option<String>,
}

impl std::fmt::Debug for ObjectStoreAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreAdapter")
            .field("bucket", &self.bucket)
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

impl ObjectStoreAdapter {
    pub fn new(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
            account_id: None,
        }
    }

    pub fn with_account(mut self, account_id: Option<String>) -> Self {
        self.account_id = account_id;
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn account_id(&self) -> Option<&str> {
        self.account_id.as_deref()
    }

    pub fn store(&self) -> Arc<dyn ObjectStore> {
        Arc::clone(&self.store)
    }

    pub fn location(&self, key: impl Into<String>) -> ObjectLocation {
        ObjectLocation {
            bucket: self.bucket.clone(),
            key: key.into(),
            account_id: self.account_id.clone(),
        }
    }

    /// Writes `context` as canonical JSON to `key`
    #[instrument(skip(self, context), fields(bucket = %self.bucket))]
    pub async fn persist_context(&self, context: &Context, key: &str) -> Result<(), StoreError> {
        let body = canonical_json(&Value::Object(context.clone()))?;
        self.put_bytes(key, body, Some(JSON_CONTENT_TYPE)).await
    }

    /// Server-side copy of `source` to `dest_key` in `dest_bucket` (this
    /// adapter's bucket when `None`).
    #[instrument(skip(self), fields(source = %source.uri()))]
    pub async fn copy(
        &self,
        source: &ObjectLocation,
        dest_key: &str,
        dest_bucket: Option<&str>,
    ) -> Result<ObjectLocation, StoreError> {
        if let (Some(from), Some(to)) = (source.account_id.as_deref(), self.account_id.as_deref()) {
            if from != to {
                return Err(StoreError::UnsupportedOperation(format!(
                    "cross-account copy from account {} to account {}",
                    from, to
                )));
            }
        }

        let dest_bucket = dest_bucket.unwrap_or(&self.bucket);
        self.store
            .copy(&source.bucket, &source.key, dest_bucket, dest_key)
            .await?;

        debug!("Copied {} to s3://{}/{}", source.uri(), dest_bucket, dest_key);

        Ok(ObjectLocation {
            bucket: dest_bucket.to_string(),
            key: dest_key.to_string(),
            account_id: self.account_id.clone(),
        })
    }

    pub async fn put_bytes(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StoreError> {
        self.store.put(&self.bucket, key, body, content_type).await
    }

    pub async fn read(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.store.get(&self.bucket, key).await
    }

    /// Keys of the files directly or indirectly under the folder `prefix`,
    /// directory markers excluded
    pub async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .list_folder(prefix)
            .await?
            .into_iter()
            .map(|object| object.key)
            .collect())
    }

    pub async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.store.delete(&self.bucket, key).await
    }

    async fn list_folder(&self, prefix: &str) -> Result<Vec<ObjectSummary>, StoreError> {
        let folder = folder_prefix(prefix);
        let objects = self.store.list(&self.bucket, &folder).await?;

        Ok(objects
            .into_iter()
            .filter(|object| !object.key.ends_with('/'))
            .collect())
    }
}

#[async_trait]
impl ExtractCapability for ObjectStoreAdapter {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn fetch(
        &self,
        path: &str,
        mask: Option<&str>,
    ) -> Result<Vec<FetchedDataset>, ExtractError> {
        let pattern = mask.map(compile_mask).transpose()?;

        let objects = self.list_folder(path).await.map_err(|e| match e {
            StoreError::StorageUnavailable(reason) => ExtractError::SourceUnavailable {
                path: path.to_string(),
                reason,
            },
            other => ExtractError::Store(other),
        })?;

        let files: Vec<FetchedDataset> = objects
            .into_iter()
            .filter_map(|object| {
                let location = self.location(object.key);
                if !matches_mask(pattern.as_ref(), location.basename()) {
                    return None;
                }
                Some(FetchedDataset::Object(StoredObject::new(
                    location,
                    object.size,
                    object.last_modified,
                    self.store(),
                )))
            })
            .collect();

        debug!("Fetched {} file(s) under {}", files.len(), path);

        Ok(files)
    }
}

/// `prefix` with exactly one trailing slash, so sibling folders sharing a
/// name prefix are not listed
fn folder_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{}/", trimmed)
    }
}

/// Compact JSON with object keys sorted at every level
pub fn canonical_json(value: &Value) -> Result<Vec<u8>, StoreError> {
    Ok(serde_json::to_vec(&sort_keys(value))?)
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_keys(v)))
                    .collect(),
            )
        },
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}
