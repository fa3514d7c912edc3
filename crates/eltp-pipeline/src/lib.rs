//! ELTP pipeline engine
//!
//! Moves datasets through four ordered stages (Extract, Transform, Load,
//! Post-process) for many independently configured protocols, recording
//! every file's journey in a provenance database.
//!
//! # Architecture
//!
//! - **models**: datasources, protocols and dataset provenance records, plus
//!   deterministic datalake path generation
//! - **capability**: the traits stages call backends through
//!   ([`ExtractCapability`], [`StorageCapability`])
//! - **storage**: object-store adapter (S3, in-memory) and fetched file handles
//! - **provenance**: [`ProvenanceStore`] over PostgreSQL or memory
//! - **stage**: the lifecycle state machine ([`run_stage`]) and the four stages
//! - **visit**, **http_source**, **warehouse**: concrete rules and backends
//!
//! # Example
//!
//! ```no_run
//! use eltp_pipeline::config::PipelineConfig;
//! use eltp_pipeline::provenance::PgProvenanceStore;
//! use eltp_pipeline::stage::{run_stage, ExtractStage};
//! use eltp_pipeline::storage::{ObjectStoreAdapter, S3ObjectStore};
//! use eltp_pipeline::visit::VisitExtractRules;
//! use std::sync::Arc;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = PipelineConfig::load()?;
//! let provenance = Arc::new(PgProvenanceStore::connect_lazy(&config.database)?);
//! let store = Arc::new(S3ObjectStore::new(&config.storage).await);
//! let datalake = ObjectStoreAdapter::new(store, config.storage.bucket.clone());
//!
//! let stage = ExtractStage::new(
//!     VisitExtractRules::new(config.visit.clone()),
//!     datalake,
//!     provenance.clone(),
//!     config.paths.clone(),
//! );
//! let report = run_stage(&stage, provenance.as_ref(), 42).await.into_result()?;
//! println!("extracted {} dataset(s)", report.datasets.len());
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod config;
pub mod http_source;
pub mod models;
pub mod provenance;
pub mod schedule;
pub mod stage;
pub mod storage;
pub mod visit;
pub mod warehouse;

pub use capability::{Context, ExtractCapability, ExtractError, StorageCapability, WarehouseError};
pub use config::{PathConfig, PipelineConfig};
pub use http_source::HttpExtractor;
pub use models::{Datasource, DatasourceDataset, DatasourceProtocol, NewDatasourceDataset};
pub use provenance::{ProvenanceError, ProvenanceStore};
pub use stage::{run_stage, Stage, StageError, StageReport, StageRun, StageState};
pub use storage::{FetchedDataset, ObjectStore, ObjectStoreAdapter, StoreError};
