//! Stage lifecycle
//!
//! Every stage runs through the same state machine:
//!
//! ```text
//! Created -> FetchingContext -> Running -> Finished
//!                  |               |
//!                  +---> Failed <--+
//! ```
//!
//! [`run_stage`] resolves the datasource for the scheduler's task id, hands
//! it to [`Stage::execute_step`] and then to [`Stage::finish`]. Errors from
//! resolution or execution go through [`Stage::on_error`], which may enrich
//! the error but always returns one: a failing stage never reports success.

use async_trait::async_trait;
use eltp_common::Step;
use std::fmt;
use thiserror::Error;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::capability::{ExtractError, WarehouseError};
use crate::models::Datasource;
use crate::provenance::{ProvenanceError, ProvenanceStore};
use crate::storage::StoreError;

pub mod extract;
pub mod load;
pub mod post_process;
pub mod transform;

pub use extract::{ExtractRules, ExtractSettings, ExtractStage, FailurePolicy};
pub use load::{FixedTable, LoadRules, LoadSettings, LoadStage};
pub use post_process::{
    ConfiguredPostProcess, PostProcessOutcome, PostProcessRules, PostProcessSettings,
    PostProcessStage,
};
pub use transform::{DataFile, PassThrough, TransformRules, TransformStage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Created,
    FetchingContext,
    Running,
    Finished,
    Failed,
}

impl StageState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    pub fn can_transition_to(self, next: StageState) -> bool {
        use StageState::*;
        matches!(
            (self, next),
            (Created, FetchingContext)
                | (FetchingContext, Running)
                | (Running, Finished)
                | (FetchingContext, Failed)
                | (Running, Failed)
        )
    }

    pub fn transition(self, next: StageState) -> Result<StageState, StageError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(StageError::IllegalTransition {
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for StageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::FetchingContext => "fetching_context",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Protocol that failed under the isolate-protocol policy
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolFailure {
    pub protocol_id: i64,
    pub error: String,
}

impl fmt::Display for ProtocolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol {}: {}", self.protocol_id, self.error)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageReport {
    pub protocols_run: usize,
    pub protocols_skipped: usize,
    /// Datasets the stage created or advanced, in processing order
    pub datasets: Vec<Uuid>,
    pub failures: Vec<ProtocolFailure>,
}

#[derive(Error, Debug)]
pub enum StageError {
    #[error("No datasource for task {0}")]
    UnknownDatasource(i64),

    #[error("Invalid file format: {0}")]
    InvalidFileFormat(String),

    #[error("{} protocol(s) failed: {}", .0.len(), join_failures(.0))]
    ProtocolsFailed(Vec<ProtocolFailure>),

    #[error("Illegal stage transition from {from} to {to}")]
    IllegalTransition { from: StageState, to: StageState },

    #[error("Dataset {0} has no source path")]
    MissingSourcePath(Uuid),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Warehouse(#[from] WarehouseError),

    #[error(transparent)]
    Provenance(#[from] ProvenanceError),

    #[error("Stage rules failed: {0:#}")]
    Rules(#[from] anyhow::Error),
}

fn join_failures(failures: &[ProtocolFailure]) -> String {
    failures
        .iter()
        .map(ProtocolFailure::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[async_trait]
pub trait Stage: Send + Sync {
    fn process_type(&self) -> Step;

    async fn execute_step(&self, datasource: &Datasource) -> Result<StageReport, StageError>;

    /// Bookkeeping after a successful step
    async fn finish(&self, datasource: &Datasource, report: &StageReport) -> Result<(), StageError> {
        info!(
            datasource_id = datasource.id,
            protocols_run = report.protocols_run,
            protocols_skipped = report.protocols_skipped,
            datasets = report.datasets.len(),
            "{} finished",
            self.process_type()
        );
        Ok(())
    }

    /// Cleanup hook for a failed run. Returns the error the run ends with.
    async fn on_error(&self, task_id: i64, error: StageError) -> StageError {
        error!(task_id, error = %error, "{} failed", self.process_type());
        error
    }
}

/// Outcome of one stage invocation
#[derive(Debug)]
pub struct StageRun {
    pub task_id: i64,
    pub process_type: Step,
    pub state: StageState,
    pub outcome: Result<StageReport, StageError>,
}

impl StageRun {
    pub fn is_finished(&self) -> bool {
        self.state == StageState::Finished
    }

    pub fn report(&self) -> Option<&StageReport> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&StageError> {
        self.outcome.as_ref().err()
    }

    pub fn into_result(self) -> Result<StageReport, StageError> {
        self.outcome
    }
}

/// Drives `stage` through its lifecycle for `task_id`
pub async fn run_stage<S>(stage: &S, provenance: &dyn ProvenanceStore, task_id: i64) -> StageRun
where
    S: Stage + ?Sized,
{
    let process_type = stage.process_type();
    let span = info_span!("stage", task_id, process_type = %process_type);

    async move {
        let mut state = StageState::Created;

        let outcome = match prepare_and_execute(stage, provenance, task_id, &mut state).await {
            Ok((datasource, report)) => match stage.finish(&datasource, &report).await {
                Ok(()) => state.transition(StageState::Finished).map(|next| {
                    state = next;
                    report
                }),
                Err(e) => Err(e),
            },
            Err(e) => Err(stage.on_error(task_id, e).await),
        };

        if outcome.is_err() {
            state = state
                .transition(StageState::Failed)
                .unwrap_or(StageState::Failed);
        }

        StageRun {
            task_id,
            process_type,
            state,
            outcome,
        }
    }
    .instrument(span)
    .await
}

async fn prepare_and_execute<S>(
    stage: &S,
    provenance: &dyn ProvenanceStore,
    task_id: i64,
    state: &mut StageState,
) -> Result<(Datasource, StageReport), StageError>
where
    S: Stage + ?Sized,
{
    *state = state.transition(StageState::FetchingContext)?;

    let datasource = provenance
        .get_datasource(task_id)
        .await
        .map_err(|e| match e {
            ProvenanceError::NotFound(_) => StageError::UnknownDatasource(task_id),
            other => StageError::Provenance(other),
        })?;

    info!(datasource_id = datasource.id, name = %datasource.name, "Resolved datasource");

    *state = state.transition(StageState::Running)?;
    let report = stage.execute_step(&datasource).await?;

    Ok((datasource, report))
}
