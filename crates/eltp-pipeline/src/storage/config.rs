use serde::{Deserialize, Serialize};
use std::env;

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_BUCKET: &str = "eltp-datalake";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    pub endpoint: Option<String>,
    pub region: String,
    /// Datalake bucket
    pub bucket: String,
    /// Bucket holding client drop zones; the datalake bucket when unset
    pub source_bucket: Option<String>,
    /// Static credentials; the default AWS provider chain is used when unset
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub path_style: bool,
    pub account_id: Option<String>,
    pub source_account_id: Option<String>,
}

impl StorageConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let access_key = env::var("S3_ACCESS_KEY")
            .or_else(|_| env::var("AWS_ACCESS_KEY_ID"))
            .ok();
        let secret_key = env::var("S3_SECRET_KEY")
            .or_else(|_| env::var("AWS_SECRET_ACCESS_KEY"))
            .ok();

        if access_key.is_some() != secret_key.is_some() {
            anyhow::bail!("S3 access key and secret key must be set together");
        }

        Ok(Self {
            endpoint: env::var("S3_ENDPOINT").ok(),
            region: env::var("S3_REGION").unwrap_or_else(|_| DEFAULT_REGION.to_string()),
            bucket: env::var("S3_BUCKET").unwrap_or_else(|_| DEFAULT_BUCKET.to_string()),
            source_bucket: env::var("S3_SOURCE_BUCKET").ok(),
            access_key,
            secret_key,
            path_style: env::var("S3_PATH_STYLE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            account_id: env::var("S3_ACCOUNT_ID").ok(),
            source_account_id: env::var("S3_SOURCE_ACCOUNT_ID").ok(),
        })
    }

    pub fn for_minio(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            region: DEFAULT_REGION.to_string(),
            bucket: bucket.into(),
            source_bucket: None,
            access_key: Some("minioadmin".to_string()),
            secret_key: Some("minioadmin".to_string()),
            path_style: true,
            account_id: None,
            source_account_id: None,
        }
    }

    pub fn source_bucket(&self) -> &str {
        self.source_bucket.as_deref().unwrap_or(&self.bucket)
    }

    /// Owning account of the source bucket, inherited from the datalake
    /// account when both live in the same bucket
    pub fn source_account_id(&self) -> Option<&str> {
        match (&self.source_bucket, &self.source_account_id) {
            (_, Some(account)) => Some(account),
            (None, None) => self.account_id.as_deref(),
            (Some(_), None) => None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            region: DEFAULT_REGION.to_string(),
            bucket: DEFAULT_BUCKET.to_string(),
            source_bucket: None,
            access_key: None,
            secret_key: None,
            path_style: false,
            account_id: None,
            source_account_id: None,
        }
    }
}
