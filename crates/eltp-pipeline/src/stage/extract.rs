//! Extract stage
//!
//! For every protocol of the datasource that is due, fetches the matching
//! source files and moves each one into the datalake:
//!
//! 1. validate the file (`check_format`)
//! 2. record provenance (`save_dataset`)
//! 3. build the context document
//! 4. write the file and `context.json` under the dataset's extract folder
//! 5. point the record at that folder and stamp it extracted
//!    (`update_dataset`)
//! 6. delete the original
//!
//! Provenance is written before any datalake write, so a crash between
//! steps leaves a traceable record instead of silently lost data.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use eltp_common::{join_path, Step, CONTEXT_FILE_NAME};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::{ProtocolFailure, Stage, StageError, StageReport};
use crate::capability::{Context, ExtractCapability};
use crate::config::PathConfig;
use crate::models::{Datasource, DatasourceProtocol};
use crate::provenance::ProvenanceStore;
use crate::storage::{FetchedDataset, ObjectStoreAdapter};

/// Default scheduler granularity used to decide whether a protocol is due.
pub const DEFAULT_SCHEDULE_WINDOW_SECS: u64 = 3600;

/// Source-specific validation and context building
pub trait ExtractRules: Send + Sync {
    fn check_format(&self, file: &FetchedDataset) -> anyhow::Result<bool>;

    fn create_context(&self, file: &FetchedDataset) -> anyhow::Result<Context>;
}

impl<R: ExtractRules + ?Sized> ExtractRules for Arc<R> {
    fn check_format(&self, file: &FetchedDataset) -> anyhow::Result<bool> {
        (**self).check_format(file)
    }

    fn create_context(&self, file: &FetchedDataset) -> anyhow::Result<Context> {
        (**self).create_context(file)
    }
}

/// What a failing protocol does to the rest of the run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// First error ends the run
    #[default]
    Abort,
    /// Record the error, move on to the next protocol, fail at the end
    IsolateProtocol,
}

impl FromStr for FailurePolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "abort" => Ok(Self::Abort),
            "isolate-protocol" | "isolate_protocol" | "isolate" => Ok(Self::IsolateProtocol),
            other => anyhow::bail!("Unknown extract failure policy: {}", other),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abort => f.write_str("abort"),
            Self::IsolateProtocol => f.write_str("isolate-protocol"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractSettings {
    pub failure_policy: FailurePolicy,
    pub schedule_window: Duration,
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            failure_policy: FailurePolicy::Abort,
            schedule_window: Duration::from_secs(DEFAULT_SCHEDULE_WINDOW_SECS),
        }
    }
}

impl ExtractSettings {
    /// `EXTRACT_FAILURE_POLICY`, `ELTP_SCHEDULE_WINDOW_SECS`
    pub fn from_env() -> anyhow::Result<Self> {
        let failure_policy = match std::env::var("EXTRACT_FAILURE_POLICY") {
            Ok(value) => value.parse()?,
            Err(_) => FailurePolicy::default(),
        };

        let window_secs = match std::env::var("ELTP_SCHEDULE_WINDOW_SECS") {
            Ok(value) => match value.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => secs,
                _ => anyhow::bail!("Invalid ELTP_SCHEDULE_WINDOW_SECS: {}", value),
            },
            Err(_) => DEFAULT_SCHEDULE_WINDOW_SECS,
        };

        Ok(Self {
            failure_policy,
            schedule_window: Duration::from_secs(window_secs),
        })
    }
}

pub struct ExtractStage<R: ExtractRules> {
    rules: R,
    source: Arc<dyn ExtractCapability>,
    datalake: ObjectStoreAdapter,
    provenance: Arc<dyn ProvenanceStore>,
    paths: PathConfig,
    settings: ExtractSettings,
    run_at: Option<DateTime<Utc>>,
}

impl<R: ExtractRules> ExtractStage<R> {
    /// Stage reading from the datalake adapter itself; use
    /// [`with_source`](Self::with_source) for a separate source bucket or an
    /// API.
    pub fn new(
        rules: R,
        datalake: ObjectStoreAdapter,
        provenance: Arc<dyn ProvenanceStore>,
        paths: PathConfig,
    ) -> Self {
        Self {
            rules,
            source: Arc::new(datalake.clone()),
            datalake,
            provenance,
            paths,
            settings: ExtractSettings::default(),
            run_at: None,
        }
    }

    pub fn with_source(mut self, source: Arc<dyn ExtractCapability>) -> Self {
        self.source = source;
        self
    }

    pub fn with_settings(mut self, settings: ExtractSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Evaluate protocol schedules at `at` instead of the wall clock
    pub fn run_at(mut self, at: DateTime<Utc>) -> Self {
        self.run_at = Some(at);
        self
    }

    async fn extract_protocol(
        &self,
        protocol: &DatasourceProtocol,
        report: &mut StageReport,
    ) -> Result<(), StageError> {
        let source_path = protocol.source_path(&self.paths);
        let files = self
            .source
            .fetch(&source_path, protocol.data_file.as_deref())
            .await?;

        info!(
            source_path = %source_path,
            mask = ?protocol.data_file,
            files = files.len(),
            "Fetched source files"
        );

        for file in &files {
            let dataset_id = self.extract_file(protocol, file).await?;
            report.datasets.push(dataset_id);
        }

        Ok(())
    }

    async fn extract_file(
        &self,
        protocol: &DatasourceProtocol,
        file: &FetchedDataset,
    ) -> Result<Uuid, StageError> {
        if !self.rules.check_format(file)? {
            return Err(StageError::InvalidFileFormat(file.name().to_string()));
        }

        let mut dataset = self
            .provenance
            .save_dataset(file.to_provenance_record(protocol))
            .await?;

        let context = self.rules.create_context(file)?;
        let destination =
            protocol.generate_datalake_path(&self.paths, dataset.id, Step::Extract, None);

        file.persist(&self.datalake, &join_path(&[destination.as_str(), file.name()]))
            .await?;
        self.datalake
            .persist_context(&context, &join_path(&[destination.as_str(), CONTEXT_FILE_NAME]))
            .await?;

        dataset.data_path_source = Some(destination);
        dataset.mark_processed(Step::Extract, Utc::now());
        self.provenance.update_dataset(&dataset).await?;

        file.remove_from_source().await?;

        debug!(
            dataset_id = %dataset.id,
            file = file.name(),
            source = %file.source_uri(),
            "Extracted file"
        );

        Ok(dataset.id)
    }
}

#[async_trait]
impl<R: ExtractRules> Stage for ExtractStage<R> {
    fn process_type(&self) -> Step {
        Step::Extract
    }

    async fn execute_step(&self, datasource: &Datasource) -> Result<StageReport, StageError> {
        let mut report = StageReport::default();

        if !datasource.enabled {
            warn!(datasource_id = datasource.id, "Datasource disabled, nothing to extract");
            return Ok(report);
        }

        let now = self.run_at.unwrap_or_else(Utc::now);

        for protocol in &datasource.protocols {
            if !protocol.should_execute(now, self.settings.schedule_window) {
                info!(protocol_id = protocol.id, "Protocol not due, skipping");
                report.protocols_skipped += 1;
                continue;
            }

            report.protocols_run += 1;
            let span = info_span!("protocol", protocol_id = protocol.id);

            if let Err(e) = self
                .extract_protocol(protocol, &mut report)
                .instrument(span)
                .await
            {
                match self.settings.failure_policy {
                    FailurePolicy::Abort => return Err(e),
                    FailurePolicy::IsolateProtocol => {
                        error!(protocol_id = protocol.id, error = %e, "Protocol failed, continuing");
                        report.failures.push(ProtocolFailure {
                            protocol_id: protocol.id,
                            error: e.to_string(),
                        });
                    },
                }
            }
        }

        if !report.failures.is_empty() {
            return Err(StageError::ProtocolsFailed(report.failures));
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_failure_policy_from_str() {
        assert_eq!("abort".parse::<FailurePolicy>().unwrap(), FailurePolicy::Abort);
        assert_eq!(
            "Isolate-Protocol".parse::<FailurePolicy>().unwrap(),
            FailurePolicy::IsolateProtocol
        );
        assert!("retry".parse::<FailurePolicy>().is_err());
        assert_eq!(FailurePolicy::IsolateProtocol.to_string(), "isolate-protocol");
    }

    #[test]
    #[serial]
    fn test_settings_from_env() {
        std::env::set_var("EXTRACT_FAILURE_POLICY", "isolate-protocol");
        std::env::set_var("ELTP_SCHEDULE_WINDOW_SECS", "900");
        let settings = ExtractSettings::from_env().unwrap();
        assert_eq!(settings.failure_policy, FailurePolicy::IsolateProtocol);
        assert_eq!(settings.schedule_window, Duration::from_secs(900));

        std::env::set_var("ELTP_SCHEDULE_WINDOW_SECS", "hourly");
        assert!(ExtractSettings::from_env().is_err());
        std::env::set_var("ELTP_SCHEDULE_WINDOW_SECS", "0");
        assert!(ExtractSettings::from_env().is_err());

        std::env::remove_var("EXTRACT_FAILURE_POLICY");
        std::env::remove_var("ELTP_SCHEDULE_WINDOW_SECS");
        assert_eq!(ExtractSettings::from_env().unwrap(), ExtractSettings::default());
    }

    #[test]
    fn test_default_settings() {
        let settings = ExtractSettings::default();
        assert_eq!(settings.failure_policy, FailurePolicy::Abort);
        assert_eq!(settings.schedule_window, Duration::from_secs(3600));
    }
}
