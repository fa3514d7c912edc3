//! Dataset provenance records

use chrono::{DateTime, Utc};
use eltp_common::Step;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provenance of one extracted file set (maps to `datasource_dataset`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DatasourceDataset {
    pub id: Uuid,
    pub organisation_id: i64,
    pub datasource_protocol_id: i64,
    /// Where the current artifact of the dataset lives
    pub data_path_source: Option<String>,
    /// Original or archived location
    pub data_path_archive: Option<String>,
    pub process_e_timestamp: Option<DateTime<Utc>>,
    pub process_t_timestamp: Option<DateTime<Utc>>,
    pub process_l_timestamp: Option<DateTime<Utc>>,
    pub process_p_timestamp: Option<DateTime<Utc>>,
    pub process_post_protocol: i32,
    pub process_post_source: i32,
}

impl DatasourceDataset {
    pub fn processed_at(&self, step: Step) -> Option<DateTime<Utc>> {
        match step {
            Step::Extract => self.process_e_timestamp,
            Step::Transform => self.process_t_timestamp,
            Step::Load => self.process_l_timestamp,
            Step::PostProcess => self.process_p_timestamp,
        }
    }

    pub fn mark_processed(&mut self, step: Step, at: DateTime<Utc>) {
        let slot = match step {
            Step::Extract => &mut self.process_e_timestamp,
            Step::Transform => &mut self.process_t_timestamp,
            Step::Load => &mut self.process_l_timestamp,
            Step::PostProcess => &mut self.process_p_timestamp,
        };
        *slot = Some(at);
    }

    /// Waiting for `step`: the previous step is done, `step` is not, and
    /// there is an artifact to work on. Rows left behind by an interrupted
    /// extract have no source path and are never pending.
    pub fn is_pending(&self, step: Step) -> bool {
        match step.previous() {
            Some(previous) => {
                self.data_path_source.is_some()
                    && self.processed_at(previous).is_some()
                    && self.processed_at(step).is_none()
            },
            None => false,
        }
    }
}

/// Column holding the completion timestamp of `step`
pub fn timestamp_column(step: Step) -> &'static str {
    match step {
        Step::Extract => "process_e_timestamp",
        Step::Transform => "process_t_timestamp",
        Step::Load => "process_l_timestamp",
        Step::PostProcess => "process_p_timestamp",
    }
}

/// Insert payload for a dataset record; the id is generated when unset.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewDatasourceDataset {
    pub id: Option<Uuid>,
    pub organisation_id: i64,
    pub datasource_protocol_id: i64,
    pub data_path_source: Option<String>,
    pub data_path_archive: Option<String>,
    pub process_e_timestamp: Option<DateTime<Utc>>,
}

impl NewDatasourceDataset {
    pub fn into_dataset(self) -> DatasourceDataset {
        DatasourceDataset {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            organisation_id: self.organisation_id,
            datasource_protocol_id: self.datasource_protocol_id,
            data_path_source: self.data_path_source,
            data_path_archive: self.data_path_archive,
            process_e_timestamp: self.process_e_timestamp,
            process_t_timestamp: None,
            process_l_timestamp: None,
            process_p_timestamp: None,
            process_post_protocol: 0,
            process_post_source: 0,
        }
    }
}
