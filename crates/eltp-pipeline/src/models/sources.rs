//! Datasources and ingestion protocols

use chrono::{DateTime, Utc};
use eltp_common::{join_path, Step};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

use crate::config::PathConfig;
use crate::schedule;

/// A logical data source belonging to one organisation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datasource {
    pub id: i64,
    pub organisation_id: i64,
    pub name: String,
    pub enabled: bool,
    pub interface_type: i32,
    /// Owned protocols, ordered by protocol id
    pub protocols: Vec<DatasourceProtocol>,
}

impl Datasource {
    pub fn protocol(&self, protocol_id: i64) -> Option<&DatasourceProtocol> {
        self.protocols.iter().find(|p| p.id == protocol_id)
    }
}

/// One ingestion rule under a datasource: where to look, which files to
/// take, and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DatasourceProtocol {
    pub id: i64,
    pub datasource_id: i64,
    /// Copied from the owning datasource
    pub organisation_id: i64,
    /// Remote directory, relative to the client folder
    pub data_path: String,
    /// Glob mask applied to file names; `None` keeps every file
    pub data_file: Option<String>,
    /// Cron expression; `None` means every run
    pub protocol_period: Option<String>,
    /// Period the source files cover, informational only
    pub source_period: Option<String>,
    pub enabled: bool,
}

impl DatasourceProtocol {
    /// `{ftp_prefix}/client-{organisation_id}/{data_path}`
    pub fn source_path(&self, paths: &PathConfig) -> String {
        let client = format!("client-{}", self.organisation_id);
        join_path(&[
            paths.ftp_prefix.as_str(),
            client.as_str(),
            self.data_path.as_str(),
        ])
    }

    /// `{datalake_prefix}/{datasource_id}/{dataset_id}/{step}[/{suffix}]`
    ///
    /// Every artifact of a dataset/step pair lives under this path, so the
    /// result depends on nothing but the arguments.
    pub fn generate_datalake_path(
        &self,
        paths: &PathConfig,
        dataset_id: Uuid,
        step: Step,
        suffix: Option<&str>,
    ) -> String {
        let datasource = self.datasource_id.to_string();
        let dataset = dataset_id.to_string();
        join_path(&[
            paths.datalake_prefix.as_str(),
            datasource.as_str(),
            dataset.as_str(),
            step.as_str(),
            suffix.unwrap_or_default(),
        ])
    }

    /// True when the protocol is enabled and its period has an occurrence in
    /// `(now - window, now]`.
    pub fn should_execute(&self, now: DateTime<Utc>, window: Duration) -> bool {
        if !self.enabled {
            return false;
        }

        match schedule::is_due(self.protocol_period.as_deref(), now, window) {
            Ok(due) => due,
            Err(e) => {
                warn!(
                    protocol_id = self.id,
                    period = ?self.protocol_period,
                    error = %e,
                    "Ignoring protocol with unusable period"
                );
                false
            },
        }
    }
}
