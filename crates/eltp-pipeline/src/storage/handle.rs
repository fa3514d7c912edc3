//! Handles to fetched source files

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::{ObjectLocation, ObjectStore, ObjectStoreAdapter, StoreError};
use crate::models::{DatasourceProtocol, NewDatasourceDataset};

/// A source file returned by an [`ExtractCapability`](crate::capability::ExtractCapability),
/// tagged by the kind of backend it came from.
#[derive(Debug, Clone)]
pub enum FetchedDataset {
    Object(StoredObject),
    Payload(PayloadDataset),
}

/// Object-store object plus the store it was listed from
#[derive(Clone)]
pub struct StoredObject {
    location: ObjectLocation,
    size: i64,
    last_modified: Option<DateTime<Utc>>,
    store: Arc<dyn ObjectStore>,
}

impl fmt::Debug for StoredObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredObject")
            .field("location", &self.location)
            .field("size", &self.size)
            .field("last_modified", &self.last_modified)
            .finish_non_exhaustive()
    }
}

impl StoredObject {
    pub fn new(
        location: ObjectLocation,
        size: i64,
        last_modified: Option<DateTime<Utc>>,
        store: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            location,
            size,
            last_modified,
            store,
        }
    }

    pub fn location(&self) -> &ObjectLocation {
        &self.location
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.last_modified
    }
}

/// Body returned by an API source, held in memory
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadDataset {
    name: String,
    body: Vec<u8>,
    origin: String,
}

impl PayloadDataset {
    pub fn new(name: impl Into<String>, body: Vec<u8>, origin: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body,
            origin: origin.into(),
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl FetchedDataset {
    /// File name without its folder
    pub fn name(&self) -> &str {
        match self {
            Self::Object(object) => object.location.basename(),
            Self::Payload(payload) => &payload.name,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Self::Object(object) => u64::try_from(object.size).unwrap_or(0),
            Self::Payload(payload) => payload.body.len() as u64,
        }
    }

    /// Where the file was found (`s3://bucket/key` or the request URL)
    pub fn source_uri(&self) -> String {
        match self {
            Self::Object(object) => object.location.uri(),
            Self::Payload(payload) => payload.origin.clone(),
        }
    }

    pub async fn read(&self) -> Result<Vec<u8>, StoreError> {
        match self {
            Self::Object(object) => {
                object
                    .store
                    .get(&object.location.bucket, &object.location.key)
                    .await
            },
            Self::Payload(payload) => Ok(payload.body.clone()),
        }
    }

    /// Writes the file to `destination` in the datalake. Objects are copied
    /// server-side, payloads are uploaded.
    pub async fn persist(
        &self,
        datalake: &ObjectStoreAdapter,
        destination: &str,
    ) -> Result<ObjectLocation, StoreError> {
        match self {
            Self::Object(object) => datalake.copy(&object.location, destination, None).await,
            Self::Payload(payload) => {
                datalake
                    .put_bytes(destination, payload.body.clone(), None)
                    .await?;
                Ok(datalake.location(destination))
            },
        }
    }

    /// Deletes the original. API payloads cannot be cleaned, so this is a
    /// no-op for them.
    pub async fn remove_from_source(&self) -> Result<(), StoreError> {
        match self {
            Self::Object(object) => {
                object
                    .store
                    .delete(&object.location.bucket, &object.location.key)
                    .await
            },
            Self::Payload(payload) => {
                debug!("Leaving API payload {} at its source", payload.origin);
                Ok(())
            },
        }
    }

    /// Insert payload recording this file as found for `protocol`. The
    /// extract timestamp stays unset until the file is in the datalake.
    pub fn to_provenance_record(&self, protocol: &DatasourceProtocol) -> NewDatasourceDataset {
        NewDatasourceDataset {
            id: None,
            organisation_id: protocol.organisation_id,
            datasource_protocol_id: protocol.id,
            data_path_source: None,
            data_path_archive: Some(self.source_uri()),
            process_e_timestamp: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryObjectStore;

    fn protocol() -> DatasourceProtocol {
        DatasourceProtocol {
            id: 3,
            datasource_id: 11,
            organisation_id: 7,
            data_path: "visits".to_string(),
            data_file: None,
            protocol_period: None,
            source_period: None,
            enabled: true,
        }
    }

    fn object(store: &Arc<InMemoryObjectStore>, key: &str, body: &[u8]) -> FetchedDataset {
        store.insert("source", key, body.to_vec());
        FetchedDataset::Object(StoredObject::new(
            ObjectLocation {
                bucket: "source".to_string(),
                key: key.to_string(),
                account_id: None,
            },
            body.len() as i64,
            None,
            store.clone(),
        ))
    }

    #[tokio::test]
    async fn test_object_handle_lifecycle() {
        let store = Arc::new(InMemoryObjectStore::new());
        let lake = ObjectStoreAdapter::new(store.clone(), "lake");
        let file = object(&store, "ftp/client-7/visits/site-42.csv", b"a,b\n1,2\n");

        assert_eq!(file.name(), "site-42.csv");
        assert_eq!(file.size(), 8);
        assert_eq!(file.read().await.unwrap(), b"a,b\n1,2\n".to_vec());

        let written = file.persist(&lake, "out/site-42.csv").await.unwrap();
        assert_eq!(written.uri(), "s3://lake/out/site-42.csv");

        file.remove_from_source().await.unwrap();
        assert!(!store.contains("source", "ftp/client-7/visits/site-42.csv"));
        assert!(store.contains("lake", "out/site-42.csv"));
    }

    #[tokio::test]
    async fn test_payload_handle_is_uploaded_and_never_removed() {
        let store = Arc::new(InMemoryObjectStore::new());
        let lake = ObjectStoreAdapter::new(store.clone(), "lake");
        let file = FetchedDataset::Payload(PayloadDataset::new(
            "visits.csv",
            b"x".to_vec(),
            "https://api.example.com/visits.csv",
        ));

        file.persist(&lake, "out/visits.csv").await.unwrap();
        assert_eq!(store.object("lake", "out/visits.csv").unwrap().data, b"x".to_vec());

        assert!(file.remove_from_source().await.is_ok());
        assert_eq!(file.source_uri(), "https://api.example.com/visits.csv");
    }

    #[test]
    fn test_provenance_record_points_at_source() {
        let store = Arc::new(InMemoryObjectStore::new());
        let file = object(&store, "ftp/client-7/visits/site-42.csv", b"1");

        let record = file.to_provenance_record(&protocol());

        assert_eq!(record.organisation_id, 7);
        assert_eq!(record.datasource_protocol_id, 3);
        assert_eq!(
            record.data_path_archive.as_deref(),
            Some("s3://source/ftp/client-7/visits/site-42.csv")
        );
        assert!(record.data_path_source.is_none());
        assert!(record.process_e_timestamp.is_none());
        assert!(record.id.is_none());
    }
}
