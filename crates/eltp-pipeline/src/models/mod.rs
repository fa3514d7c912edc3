//! Provenance data model
//!
//! - **sources**: datasources and their ingestion protocols (read-only for the pipeline)
//! - **dataset**: per-file provenance records written by the stages

pub mod dataset;
pub mod sources;

pub use dataset::{DatasourceDataset, NewDatasourceDataset};
pub use sources::{Datasource, DatasourceProtocol};
