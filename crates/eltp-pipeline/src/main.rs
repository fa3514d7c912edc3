//! ELTP stage runner
//!
//! Invoked by the scheduler once per stage and task:
//!
//! ```text
//! eltp extract --task-id 42
//! eltp transform --task-id 42
//! eltp load --task-id 42
//! eltp postprocess --task-id 42
//! eltp migrate
//! ```
//!
//! Stage commands take only the task id; everything else comes from the
//! environment (`LOAD_TABLE`, `POSTPROCESS_ARCHIVE_QUERY`, ...).

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use eltp_common::logging::{init_logging, LogConfig, LogLevel};
use eltp_pipeline::config::PipelineConfig;
use eltp_pipeline::provenance::PgProvenanceStore;
use eltp_pipeline::stage::{
    run_stage, ConfiguredPostProcess, ExtractStage, LoadStage, PassThrough, PostProcessStage,
    TransformStage,
};
use eltp_pipeline::storage::{ObjectStore, ObjectStoreAdapter, S3ObjectStore};
use eltp_pipeline::visit::VisitExtractRules;
use eltp_pipeline::warehouse::RedshiftWarehouse;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "eltp")]
#[command(author, version, about = "Run one ELTP pipeline stage for a scheduler task")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Pull due protocol files into the datalake
    Extract {
        #[arg(long, env = "ELTP_TASK_ID")]
        task_id: i64,

        /// Evaluate protocol schedules at this instant (RFC 3339)
        #[arg(long)]
        run_at: Option<DateTime<Utc>>,
    },

    /// Transform extracted datasets
    Transform {
        #[arg(long, env = "ELTP_TASK_ID")]
        task_id: i64,
    },

    /// Load transformed datasets into the `LOAD_TABLE` warehouse table
    Load {
        #[arg(long, env = "ELTP_TASK_ID")]
        task_id: i64,
    },

    /// Archive and post-process loaded datasets
    Postprocess {
        #[arg(long, env = "ELTP_TASK_ID")]
        task_id: i64,
    },

    /// Apply provenance schema migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = PipelineConfig::load()?;

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::default()
        .level(log_level)
        .log_file_prefix("eltp")
        .merge_env()?;
    let _guard = init_logging(&log_config)?;

    let provenance = Arc::new(PgProvenanceStore::connect_lazy(&config.database)?);

    if let Command::Migrate = cli.command {
        sqlx::migrate!("../../migrations").run(provenance.pool()).await?;
        info!("Provenance schema up to date");
        return Ok(());
    }

    let store: Arc<dyn ObjectStore> = Arc::new(S3ObjectStore::new(&config.storage).await);
    let datalake = ObjectStoreAdapter::new(Arc::clone(&store), config.storage.bucket.clone())
        .with_account(config.storage.account_id.clone());

    let run = match cli.command {
        Command::Extract { task_id, run_at } => {
            let source = ObjectStoreAdapter::new(Arc::clone(&store), config.storage.source_bucket())
                .with_account(config.storage.source_account_id().map(str::to_string));

            let mut stage = ExtractStage::new(
                VisitExtractRules::new(config.visit.clone()),
                datalake,
                provenance.clone(),
                config.paths.clone(),
            )
            .with_source(Arc::new(source))
            .with_settings(config.extract.clone());

            if let Some(at) = run_at {
                stage = stage.run_at(at);
            }

            run_stage(&stage, provenance.as_ref(), task_id).await
        },
        Command::Transform { task_id } => {
            let stage = TransformStage::new(
                PassThrough,
                datalake,
                provenance.clone(),
                config.paths.clone(),
            );
            run_stage(&stage, provenance.as_ref(), task_id).await
        },
        Command::Load { task_id } => {
            let rules = config.load.rules()?;
            let warehouse = Arc::new(RedshiftWarehouse::connect_lazy(&config.warehouse)?);
            let stage = LoadStage::new(rules, warehouse, datalake, provenance.clone());
            run_stage(&stage, provenance.as_ref(), task_id).await
        },
        Command::Postprocess { task_id } => {
            let warehouse = Arc::new(RedshiftWarehouse::connect_lazy(&config.warehouse)?);
            let stage = PostProcessStage::new(
                ConfiguredPostProcess::new(config.post_process.clone()),
                warehouse,
                datalake,
                provenance.clone(),
                config.paths.clone(),
            );
            run_stage(&stage, provenance.as_ref(), task_id).await
        },
        Command::Migrate => return Ok(()),
    };

    let process_type = run.process_type;
    let report = run.into_result()?;

    info!(
        datasets = report.datasets.len(),
        protocols_run = report.protocols_run,
        protocols_skipped = report.protocols_skipped,
        "{} complete",
        process_type
    );

    Ok(())
}
