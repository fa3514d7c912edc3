//! Provenance store
//!
//! Reads datasource configuration and records every dataset the stages
//! produce. Each call commits on its own, so partial progress of a failed
//! run stays visible.

use async_trait::async_trait;
use eltp_common::Step;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Datasource, DatasourceDataset, NewDatasourceDataset};

pub mod memory;
pub mod postgres;

pub use memory::InMemoryProvenanceStore;
pub use postgres::PgProvenanceStore;

#[derive(Error, Debug)]
pub enum ProvenanceError {
    /// Requested record does not exist
    #[error("{0}")]
    NotFound(String),

    #[error("Provenance query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Corrupt provenance row: {0}")]
    Corrupt(String),
}

impl ProvenanceError {
    pub fn not_found(resource_type: &str, identifier: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{} '{}' not found", resource_type, identifier))
    }
}

pub type ProvenanceResult<T> = Result<T, ProvenanceError>;

#[async_trait]
pub trait ProvenanceStore: Send + Sync {
    /// The datasource a scheduler task points at, with its protocols
    async fn get_datasource(&self, task_id: i64) -> ProvenanceResult<Datasource>;

    /// Inserts a dataset record and returns it as stored
    async fn save_dataset(&self, record: NewDatasourceDataset) -> ProvenanceResult<DatasourceDataset>;

    /// Full-row update keyed by id
    async fn update_dataset(&self, dataset: &DatasourceDataset) -> ProvenanceResult<()>;

    async fn get_dataset(&self, id: Uuid) -> ProvenanceResult<Option<DatasourceDataset>>;

    /// Datasets of `datasource_id` done with the step before `step` and not
    /// yet with `step`, oldest first
    async fn pending_datasets(
        &self,
        datasource_id: i64,
        step: Step,
    ) -> ProvenanceResult<Vec<DatasourceDataset>>;
}
