//! S3 object store integration tests
//!
//! **Requirements**:
//! - MinIO or S3 must be running and accessible, with the datalake bucket
//!   already created
//! - S3_ENDPOINT environment variable must be set (e.g., "http://localhost:9000")
//! - Tests will be skipped if S3_ENDPOINT is not configured

use eltp_pipeline::capability::ExtractCapability;
use eltp_pipeline::storage::config::StorageConfig;
use eltp_pipeline::storage::{ObjectStore, ObjectStoreAdapter, S3ObjectStore, StoreError};
use std::sync::Arc;
use uuid::Uuid;

async fn setup_adapter() -> Option<ObjectStoreAdapter> {
    if std::env::var("S3_ENDPOINT").is_err() {
        return None;
    }

    let config = match StorageConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Invalid storage configuration: {}", e);
            return None;
        },
    };

    let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(&config).await);
    Some(ObjectStoreAdapter::new(store, config.bucket.clone()))
}

/// Unique prefix so concurrent runs don't see each other's objects
fn test_prefix(test_name: &str) -> String {
    format!("eltp-test/{}/{}", test_name, Uuid::new_v4())
}

#[tokio::test]
async fn test_put_read_remove() {
    let Some(adapter) = setup_adapter().await else {
        println!("Skipping test: S3_ENDPOINT not configured");
        return;
    };
    let key = format!("{}/site-1.csv", test_prefix("put_read"));

    adapter.put_bytes(&key, b"a,b\n".to_vec(), Some("text/csv")).await.unwrap();
    assert_eq!(adapter.read(&key).await.unwrap(), b"a,b\n".to_vec());

    adapter.remove(&key).await.unwrap();
    assert!(matches!(adapter.read(&key).await, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn test_fetch_filters_by_mask() {
    let Some(adapter) = setup_adapter().await else {
        println!("Skipping test: S3_ENDPOINT not configured");
        return;
    };
    let prefix = test_prefix("fetch_mask");

    for name in ["site-1.csv", "site-2.csv", "notes.txt"] {
        adapter
            .put_bytes(&format!("{}/{}", prefix, name), b"x".to_vec(), None)
            .await
            .unwrap();
    }

    let mut names: Vec<String> = adapter
        .fetch(&prefix, Some("*.csv"))
        .await
        .unwrap()
        .iter()
        .map(|f| f.name().to_string())
        .collect();
    names.sort();

    assert_eq!(names, vec!["site-1.csv", "site-2.csv"]);

    for key in adapter.list_keys(&prefix).await.unwrap() {
        adapter.remove(&key).await.unwrap();
    }
}

#[tokio::test]
async fn test_copy_within_bucket() {
    let Some(adapter) = setup_adapter().await else {
        println!("Skipping test: S3_ENDPOINT not configured");
        return;
    };
    let prefix = test_prefix("copy");
    let source = format!("{}/in/site-1.csv", prefix);
    let destination = format!("{}/out/site-1.csv", prefix);

    adapter.put_bytes(&source, b"1,2\n".to_vec(), None).await.unwrap();
    let location = adapter
        .copy(&adapter.location(source.clone()), &destination, None)
        .await
        .unwrap();

    assert_eq!(location.key, destination);
    assert_eq!(adapter.read(&destination).await.unwrap(), b"1,2\n".to_vec());

    adapter.remove(&source).await.unwrap();
    adapter.remove(&destination).await.unwrap();
}
