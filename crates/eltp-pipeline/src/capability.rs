//! Capability interfaces
//!
//! Stages talk to backends only through these traits. An adapter declares
//! what it can do by implementing one or more of them:
//!
//! - [`ExtractCapability`]: list and fetch source files
//! - [`StorageCapability`]: bulk load into, export from and query a warehouse

use async_trait::async_trait;
use glob::Pattern;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::storage::handle::FetchedDataset;
use crate::storage::StoreError;

/// Small metadata mapping written next to every stage artifact
pub type Context = Map<String, Value>;

/// One warehouse row keyed by column name
pub type JsonRow = Map<String, Value>;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Source {path} unavailable: {reason}")]
    SourceUnavailable { path: String, reason: String },

    #[error("Invalid file mask '{mask}': {reason}")]
    InvalidMask { mask: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[async_trait]
pub trait ExtractCapability: Send + Sync {
    /// Lists the files under `path` whose name matches `mask`.
    ///
    /// An empty folder is an empty vector, not an error.
    async fn fetch(
        &self,
        path: &str,
        mask: Option<&str>,
    ) -> Result<Vec<FetchedDataset>, ExtractError>;
}

#[derive(Error, Debug)]
pub enum WarehouseError {
    #[error("Warehouse unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Warehouse operation failed: {0}")]
    StorageOperationFailed(String),
}

#[async_trait]
pub trait StorageCapability: Send + Sync {
    /// Copies the datalake object at `source` into `table`, returning the
    /// number of loaded rows.
    async fn load(&self, table: &str, source: &str) -> Result<u64, WarehouseError>;

    /// Exports the result of `query` under the datalake prefix `destination`.
    async fn unload(&self, query: &str, destination: &str) -> Result<(), WarehouseError>;

    async fn retrieve(&self, query: &str) -> Result<Vec<JsonRow>, WarehouseError>;
}

pub fn compile_mask(mask: &str) -> Result<Pattern, ExtractError> {
    Pattern::new(mask).map_err(|e| ExtractError::InvalidMask {
        mask: mask.to_string(),
        reason: e.to_string(),
    })
}

/// Matches a file name against an optional compiled mask; no mask keeps all.
pub fn matches_mask(pattern: Option<&Pattern>, name: &str) -> bool {
    pattern.map_or(true, |p| p.matches(name))
}
