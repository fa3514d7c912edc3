//! HTTP API source

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::capability::{compile_mask, matches_mask, ExtractCapability, ExtractError};
use crate::storage::{FetchedDataset, PayloadDataset};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Fetches `GET {base_url}/{path}` as a single in-memory payload
#[derive(Debug, Clone)]
pub struct HttpExtractor {
    client: Client,
    base_url: String,
}

impl HttpExtractor {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ExtractError> {
        let base_url = base_url.into();
        let client = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(concat!("eltp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ExtractError::SourceUnavailable {
                path: base_url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self::with_client(client, base_url))
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl ExtractCapability for HttpExtractor {
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn fetch(
        &self,
        path: &str,
        mask: Option<&str>,
    ) -> Result<Vec<FetchedDataset>, ExtractError> {
        let pattern = mask.map(compile_mask).transpose()?;
        let name = path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();

        if !matches_mask(pattern.as_ref(), &name) {
            debug!("{} does not match mask {:?}", name, mask);
            return Ok(Vec::new());
        }

        let url = self.url(path);
        let unavailable = |reason: String| ExtractError::SourceUnavailable {
            path: url.clone(),
            reason,
        };

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                debug!("Nothing published at {}", url);
                Ok(Vec::new())
            },
            status if !status.is_success() => Err(unavailable(format!("HTTP {}", status))),
            _ => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| unavailable(e.to_string()))?;
                debug!("Fetched {} bytes from {}", body.len(), url);
                Ok(vec![FetchedDataset::Payload(PayloadDataset::new(
                    name,
                    body.to_vec(),
                    url.clone(),
                ))])
            },
        }
    }
}
