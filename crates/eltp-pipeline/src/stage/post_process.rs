//! Post-process stage driver

use async_trait::async_trait;
use chrono::Utc;
use eltp_common::Step;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::{Stage, StageError, StageReport};
use crate::capability::StorageCapability;
use crate::config::PathConfig;
use crate::models::{Datasource, DatasourceDataset};
use crate::provenance::ProvenanceStore;
use crate::storage::ObjectStoreAdapter;

/// Passes the hook ran, added to the dataset's post-process counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostProcessOutcome {
    pub protocol_passes: i32,
    pub source_passes: i32,
}

#[async_trait]
pub trait PostProcessRules: Send + Sync {
    /// Warehouse query whose result is archived to the datalake, if any
    fn archive_query(&self, dataset: &DatasourceDataset) -> Option<String>;

    async fn post_process(
        &self,
        dataset: &DatasourceDataset,
        warehouse: &dyn StorageCapability,
    ) -> anyhow::Result<PostProcessOutcome>;
}

/// Placeholder replaced by the dataset id in a configured archive query
pub const DATASET_ID_PLACEHOLDER: &str = "{dataset_id}";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostProcessSettings {
    /// Warehouse query archived for each dataset; may contain `{dataset_id}`
    pub archive_query: Option<String>,
}

impl PostProcessSettings {
    /// `POSTPROCESS_ARCHIVE_QUERY`
    pub fn from_env() -> Self {
        Self {
            archive_query: std::env::var("POSTPROCESS_ARCHIVE_QUERY")
                .ok()
                .filter(|query| !query.trim().is_empty()),
        }
    }
}

/// Archives the configured query, if any, and counts one protocol pass
#[derive(Debug, Clone, Default)]
pub struct ConfiguredPostProcess {
    settings: PostProcessSettings,
}

impl ConfiguredPostProcess {
    pub fn new(settings: PostProcessSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl PostProcessRules for ConfiguredPostProcess {
    fn archive_query(&self, dataset: &DatasourceDataset) -> Option<String> {
        self.settings
            .archive_query
            .as_ref()
            .map(|query| query.replace(DATASET_ID_PLACEHOLDER, &dataset.id.to_string()))
    }

    async fn post_process(
        &self,
        _dataset: &DatasourceDataset,
        _warehouse: &dyn StorageCapability,
    ) -> anyhow::Result<PostProcessOutcome> {
        Ok(PostProcessOutcome {
            protocol_passes: 1,
            source_passes: 0,
        })
    }
}

pub struct PostProcessStage<R: PostProcessRules> {
    rules: R,
    warehouse: Arc<dyn StorageCapability>,
    datalake: ObjectStoreAdapter,
    provenance: Arc<dyn ProvenanceStore>,
    paths: PathConfig,
}

impl<R: PostProcessRules> PostProcessStage<R> {
    pub fn new(
        rules: R,
        warehouse: Arc<dyn StorageCapability>,
        datalake: ObjectStoreAdapter,
        provenance: Arc<dyn ProvenanceStore>,
        paths: PathConfig,
    ) -> Self {
        Self {
            rules,
            warehouse,
            datalake,
            provenance,
            paths,
        }
    }

    async fn post_process_dataset(
        &self,
        datasource: &Datasource,
        mut dataset: DatasourceDataset,
    ) -> Result<Option<DatasourceDataset>, StageError> {
        let Some(protocol) = datasource.protocol(dataset.datasource_protocol_id) else {
            warn!(dataset_id = %dataset.id, "Dataset protocol no longer exists, skipping");
            return Ok(None);
        };

        if let Some(query) = self.rules.archive_query(&dataset) {
            let archive =
                protocol.generate_datalake_path(&self.paths, dataset.id, Step::PostProcess, None);
            let destination = self.datalake.location(format!("{}/", archive)).uri();
            self.warehouse.unload(&query, &destination).await?;
            dataset.data_path_archive = Some(destination);
        }

        let outcome = self
            .rules
            .post_process(&dataset, self.warehouse.as_ref())
            .await?;
        dataset.process_post_protocol += outcome.protocol_passes;
        dataset.process_post_source += outcome.source_passes;

        dataset.mark_processed(Step::PostProcess, Utc::now());
        self.provenance.update_dataset(&dataset).await?;

        Ok(Some(dataset))
    }
}

#[async_trait]
impl<R: PostProcessRules> Stage for PostProcessStage<R> {
    fn process_type(&self) -> Step {
        Step::PostProcess
    }

    async fn execute_step(&self, datasource: &Datasource) -> Result<StageReport, StageError> {
        let mut report = StageReport::default();
        let pending = self
            .provenance
            .pending_datasets(datasource.id, Step::PostProcess)
            .await?;

        info!(datasets = pending.len(), "Post-processing pending datasets");

        for dataset in pending {
            if let Some(done) = self.post_process_dataset(datasource, dataset).await? {
                report.datasets.push(done.id);
            }
        }

        Ok(report)
    }
}
