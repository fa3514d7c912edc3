//! Test helpers for ELTP pipeline integration tests
//!
//! - fixtures for datasource `D1` (organisation 7) and its protocols
//! - a recording object store that notes, for every datalake write, whether
//!   the dataset's provenance row already existed
//! - counting wrappers around extract sources and rules
//! - a fake warehouse

#![allow(dead_code)]

use async_trait::async_trait;
use eltp_pipeline::capability::{
    Context, ExtractCapability, ExtractError, JsonRow, StorageCapability, WarehouseError,
};
use eltp_pipeline::config::PathConfig;
use eltp_pipeline::models::{Datasource, DatasourceProtocol};
use eltp_pipeline::provenance::{InMemoryProvenanceStore, ProvenanceStore};
use eltp_pipeline::stage::ExtractRules;
use eltp_pipeline::storage::{
    FetchedDataset, InMemoryObjectStore, ObjectStore, ObjectStoreAdapter, ObjectSummary,
    StoreError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub const ORGANISATION_ID: i64 = 7;
pub const D1: i64 = 1;
pub const TASK_ID: i64 = 100;
pub const SOURCE_BUCKET: &str = "drop-zone";
pub const LAKE_BUCKET: &str = "lake";

pub fn paths() -> PathConfig {
    PathConfig {
        ftp_prefix: String::new(),
        datalake_prefix: "datalake".to_string(),
    }
}

pub fn protocol(id: i64, data_path: &str, mask: Option<&str>) -> DatasourceProtocol {
    DatasourceProtocol {
        id,
        datasource_id: D1,
        organisation_id: ORGANISATION_ID,
        data_path: data_path.to_string(),
        data_file: mask.map(str::to_string),
        protocol_period: None,
        source_period: None,
        enabled: true,
    }
}

pub fn datasource(protocols: Vec<DatasourceProtocol>) -> Datasource {
    Datasource {
        id: D1,
        organisation_id: ORGANISATION_ID,
        name: "D1".to_string(),
        enabled: true,
        interface_type: 0,
        protocols,
    }
}

// ============================================================================
// Recording object store
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEvent {
    List { bucket: String, prefix: String },
    Write { bucket: String, key: String, provenance_present: bool },
    Delete { bucket: String, key: String },
}

/// Wraps an [`InMemoryObjectStore`] and logs every call
pub struct RecordingObjectStore {
    inner: Arc<InMemoryObjectStore>,
    provenance: Arc<InMemoryProvenanceStore>,
    events: Mutex<Vec<StoreEvent>>,
}

impl RecordingObjectStore {
    pub fn new(inner: Arc<InMemoryObjectStore>, provenance: Arc<InMemoryProvenanceStore>) -> Self {
        Self {
            inner,
            provenance,
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<StoreEvent> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: StoreEvent) {
        self.events.lock().unwrap().push(event);
    }

    /// Dataset id embedded in `datalake/{datasource}/{dataset}/...`
    async fn provenance_present(&self, key: &str) -> bool {
        let Some(id) = key.split('/').nth(2).and_then(|s| Uuid::parse_str(s).ok()) else {
            return false;
        };
        matches!(self.provenance.get_dataset(id).await, Ok(Some(_)))
    }

    async fn record_write(&self, bucket: &str, key: &str) {
        let provenance_present = self.provenance_present(key).await;
        self.record(StoreEvent::Write {
            bucket: bucket.to_string(),
            key: key.to_string(),
            provenance_present,
        });
    }
}

#[async_trait]
impl ObjectStore for RecordingObjectStore {
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectSummary>, StoreError> {
        self.record(StoreEvent::List {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        });
        self.inner.list(bucket, prefix).await
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.get(bucket, key).await
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: Option<&str>,
    ) -> Result<(), StoreError> {
        self.record_write(bucket, key).await;
        self.inner.put(bucket, key, body, content_type).await
    }

    async fn copy(
        &self,
        source_bucket: &str,
        source_key: &str,
        dest_bucket: &str,
        dest_key: &str,
    ) -> Result<(), StoreError> {
        self.record_write(dest_bucket, dest_key).await;
        self.inner
            .copy(source_bucket, source_key, dest_bucket, dest_key)
            .await
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        self.record(StoreEvent::Delete {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        self.inner.delete(bucket, key).await
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Source bucket, datalake bucket and provenance store wired together
pub struct Harness {
    pub objects: Arc<InMemoryObjectStore>,
    pub recorder: Arc<RecordingObjectStore>,
    pub provenance: Arc<InMemoryProvenanceStore>,
    pub source: ObjectStoreAdapter,
    pub datalake: ObjectStoreAdapter,
}

impl Harness {
    pub fn new(datasource: Datasource) -> Self {
        let objects = Arc::new(InMemoryObjectStore::new());
        let provenance = Arc::new(InMemoryProvenanceStore::new());
        provenance.add_datasource(datasource);
        provenance.add_task(TASK_ID, D1);

        let recorder = Arc::new(RecordingObjectStore::new(objects.clone(), provenance.clone()));
        let source = ObjectStoreAdapter::new(recorder.clone(), SOURCE_BUCKET);
        let datalake = ObjectStoreAdapter::new(recorder.clone(), LAKE_BUCKET);

        Self {
            objects,
            recorder,
            provenance,
            source,
            datalake,
        }
    }

    pub fn drop_file(&self, key: &str, body: &[u8]) {
        self.objects.insert(SOURCE_BUCKET, key, body.to_vec());
    }

    pub fn provenance_store(&self) -> Arc<dyn ProvenanceStore> {
        self.provenance.clone()
    }

    pub fn lake_keys(&self) -> Vec<String> {
        self.objects.keys(LAKE_BUCKET)
    }

    pub fn source_keys(&self) -> Vec<String> {
        self.objects.keys(SOURCE_BUCKET)
    }
}

// ============================================================================
// Counting wrappers
// ============================================================================

/// Counts `fetch` calls made against the wrapped source
pub struct CountingSource {
    inner: Arc<dyn ExtractCapability>,
    pub fetches: AtomicUsize,
}

impl CountingSource {
    pub fn new(inner: Arc<dyn ExtractCapability>) -> Self {
        Self {
            inner,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractCapability for CountingSource {
    async fn fetch(
        &self,
        path: &str,
        mask: Option<&str>,
    ) -> Result<Vec<FetchedDataset>, ExtractError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch(path, mask).await
    }
}

/// Accepts files whose name does not start with `bad`; counts calls
#[derive(Default)]
pub struct TestRules {
    pub format_checks: AtomicUsize,
    pub contexts: AtomicUsize,
}

impl TestRules {
    pub fn format_checks(&self) -> usize {
        self.format_checks.load(Ordering::SeqCst)
    }
}

impl ExtractRules for TestRules {
    fn check_format(&self, file: &FetchedDataset) -> anyhow::Result<bool> {
        self.format_checks.fetch_add(1, Ordering::SeqCst);
        Ok(!file.name().starts_with("bad"))
    }

    fn create_context(&self, file: &FetchedDataset) -> anyhow::Result<Context> {
        self.contexts.fetch_add(1, Ordering::SeqCst);
        let mut context = Context::new();
        context.insert("file".to_string(), file.name().into());
        Ok(context)
    }
}

// ============================================================================
// Fake warehouse
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum WarehouseCall {
    Load { table: String, source: String },
    Unload { query: String, destination: String },
    Retrieve { query: String },
}

#[derive(Default)]
pub struct FakeWarehouse {
    pub calls: Mutex<Vec<WarehouseCall>>,
    pub rows_per_load: u64,
    pub fail: bool,
}

impl FakeWarehouse {
    pub fn calls(&self) -> Vec<WarehouseCall> {
        self.calls.lock().unwrap().clone()
    }

    fn check(&self) -> Result<(), WarehouseError> {
        if self.fail {
            Err(WarehouseError::StorageOperationFailed("relation does not exist".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl StorageCapability for FakeWarehouse {
    async fn load(&self, table: &str, source: &str) -> Result<u64, WarehouseError> {
        self.calls.lock().unwrap().push(WarehouseCall::Load {
            table: table.to_string(),
            source: source.to_string(),
        });
        self.check()?;
        Ok(self.rows_per_load)
    }

    async fn unload(&self, query: &str, destination: &str) -> Result<(), WarehouseError> {
        self.calls.lock().unwrap().push(WarehouseCall::Unload {
            query: query.to_string(),
            destination: destination.to_string(),
        });
        self.check()
    }

    async fn retrieve(&self, query: &str) -> Result<Vec<JsonRow>, WarehouseError> {
        self.calls.lock().unwrap().push(WarehouseCall::Retrieve {
            query: query.to_string(),
        });
        self.check()?;
        let mut row = JsonRow::new();
        row.insert("passes".to_string(), 1.into());
        Ok(vec![row])
    }
}
