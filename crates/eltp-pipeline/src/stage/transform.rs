//! Transform stage driver

use async_trait::async_trait;
use chrono::Utc;
use eltp_common::{join_path, Step, CONTEXT_FILE_NAME};
use std::sync::Arc;
use tracing::{info, warn};

use super::{Stage, StageError, StageReport};
use crate::capability::Context;
use crate::config::PathConfig;
use crate::models::{Datasource, DatasourceDataset};
use crate::provenance::ProvenanceStore;
use crate::storage::{ObjectStoreAdapter, StoreError};

/// A named file body moving between stage folders
#[derive(Debug, Clone, PartialEq)]
pub struct DataFile {
    pub name: String,
    pub data: Vec<u8>,
}

pub trait TransformRules: Send + Sync {
    /// Turns one extracted file into zero or more outputs
    fn transform(&self, file: &DataFile, context: &Context) -> anyhow::Result<Vec<DataFile>>;

    fn check_format(&self, output: &DataFile) -> anyhow::Result<bool>;

    fn create_context(&self, context: &Context) -> anyhow::Result<Context>;
}

/// Copies files and context through unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

impl TransformRules for PassThrough {
    fn transform(&self, file: &DataFile, _context: &Context) -> anyhow::Result<Vec<DataFile>> {
        Ok(vec![file.clone()])
    }

    fn check_format(&self, _output: &DataFile) -> anyhow::Result<bool> {
        Ok(true)
    }

    fn create_context(&self, context: &Context) -> anyhow::Result<Context> {
        Ok(context.clone())
    }
}

pub struct TransformStage<R: TransformRules> {
    rules: R,
    datalake: ObjectStoreAdapter,
    provenance: Arc<dyn ProvenanceStore>,
    paths: PathConfig,
}

impl<R: TransformRules> TransformStage<R> {
    pub fn new(
        rules: R,
        datalake: ObjectStoreAdapter,
        provenance: Arc<dyn ProvenanceStore>,
        paths: PathConfig,
    ) -> Self {
        Self {
            rules,
            datalake,
            provenance,
            paths,
        }
    }

    async fn transform_dataset(
        &self,
        datasource: &Datasource,
        mut dataset: DatasourceDataset,
    ) -> Result<Option<DatasourceDataset>, StageError> {
        let Some(protocol) = datasource.protocol(dataset.datasource_protocol_id) else {
            warn!(dataset_id = %dataset.id, "Dataset protocol no longer exists, skipping");
            return Ok(None);
        };
        let source = dataset
            .data_path_source
            .clone()
            .ok_or(StageError::MissingSourcePath(dataset.id))?;

        let context_key = join_path(&[source.as_str(), CONTEXT_FILE_NAME]);
        let context: Context =
            serde_json::from_slice(&self.datalake.read(&context_key).await?).map_err(StoreError::from)?;

        let destination =
            protocol.generate_datalake_path(&self.paths, dataset.id, Step::Transform, None);

        for key in self.datalake.list_keys(&source).await? {
            if key == context_key {
                continue;
            }

            let input = DataFile {
                name: key.rsplit('/').next().unwrap_or(&key).to_string(),
                data: self.datalake.read(&key).await?,
            };

            for output in self.rules.transform(&input, &context)? {
                if !self.rules.check_format(&output)? {
                    return Err(StageError::InvalidFileFormat(output.name));
                }
                self.datalake
                    .put_bytes(&join_path(&[destination.as_str(), output.name.as_str()]), output.data, None)
                    .await?;
            }
        }

        let context = self.rules.create_context(&context)?;
        self.datalake
            .persist_context(&context, &join_path(&[destination.as_str(), CONTEXT_FILE_NAME]))
            .await?;

        dataset.data_path_source = Some(destination);
        dataset.mark_processed(Step::Transform, Utc::now());
        self.provenance.update_dataset(&dataset).await?;

        Ok(Some(dataset))
    }
}

#[async_trait]
impl<R: TransformRules> Stage for TransformStage<R> {
    fn process_type(&self) -> Step {
        Step::Transform
    }

    async fn execute_step(&self, datasource: &Datasource) -> Result<StageReport, StageError> {
        let mut report = StageReport::default();
        let pending = self
            .provenance
            .pending_datasets(datasource.id, Step::Transform)
            .await?;

        info!(datasets = pending.len(), "Transforming pending datasets");

        for dataset in pending {
            if let Some(done) = self.transform_dataset(datasource, dataset).await? {
                report.datasets.push(done.id);
            }
        }

        Ok(report)
    }
}
