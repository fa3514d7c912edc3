//! Load stage driver

use async_trait::async_trait;
use chrono::Utc;
use eltp_common::{Step, CONTEXT_FILE_NAME};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use super::{Stage, StageError, StageReport};
use crate::capability::StorageCapability;
use crate::models::{Datasource, DatasourceDataset};
use crate::provenance::ProvenanceStore;
use crate::storage::ObjectStoreAdapter;

pub trait LoadRules: Send + Sync {
    /// Warehouse table receiving the dataset
    fn target_table(&self, dataset: &DatasourceDataset) -> anyhow::Result<String>;
}

/// Loads every dataset into the same table
#[derive(Debug, Clone, PartialEq)]
pub struct FixedTable(pub String);

impl LoadRules for FixedTable {
    fn target_table(&self, _dataset: &DatasourceDataset) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadSettings {
    /// Target table, optionally schema-qualified
    pub table: Option<String>,
}

impl LoadSettings {
    /// `LOAD_TABLE`
    pub fn from_env() -> Self {
        Self {
            table: std::env::var("LOAD_TABLE")
                .ok()
                .map(|table| table.trim().to_string())
                .filter(|table| !table.is_empty()),
        }
    }

    pub fn rules(&self) -> anyhow::Result<FixedTable> {
        match &self.table {
            Some(table) => Ok(FixedTable(table.clone())),
            None => anyhow::bail!("LOAD_TABLE not configured"),
        }
    }
}

pub struct LoadStage<R: LoadRules> {
    rules: R,
    warehouse: Arc<dyn StorageCapability>,
    datalake: ObjectStoreAdapter,
    provenance: Arc<dyn ProvenanceStore>,
}

impl<R: LoadRules> LoadStage<R> {
    pub fn new(
        rules: R,
        warehouse: Arc<dyn StorageCapability>,
        datalake: ObjectStoreAdapter,
        provenance: Arc<dyn ProvenanceStore>,
    ) -> Self {
        Self {
            rules,
            warehouse,
            datalake,
            provenance,
        }
    }

    async fn load_dataset(&self, mut dataset: DatasourceDataset) -> Result<DatasourceDataset, StageError> {
        let source = dataset
            .data_path_source
            .clone()
            .ok_or(StageError::MissingSourcePath(dataset.id))?;
        let table = self.rules.target_table(&dataset)?;

        let mut rows = 0;
        for key in self.datalake.list_keys(&source).await? {
            if key.rsplit('/').next() == Some(CONTEXT_FILE_NAME) {
                continue;
            }
            rows += self
                .warehouse
                .load(&table, &self.datalake.location(key).uri())
                .await?;
        }

        dataset.mark_processed(Step::Load, Utc::now());
        self.provenance.update_dataset(&dataset).await?;

        debug!(dataset_id = %dataset.id, table = %table, rows, "Loaded dataset");

        Ok(dataset)
    }
}

#[async_trait]
impl<R: LoadRules> Stage for LoadStage<R> {
    fn process_type(&self) -> Step {
        Step::Load
    }

    async fn execute_step(&self, datasource: &Datasource) -> Result<StageReport, StageError> {
        let mut report = StageReport::default();
        let pending = self
            .provenance
            .pending_datasets(datasource.id, Step::Load)
            .await?;

        info!(datasets = pending.len(), "Loading pending datasets");

        for dataset in pending {
            let loaded = self.load_dataset(dataset).await?;
            report.datasets.push(loaded.id);
        }

        Ok(report)
    }
}
