//! ELTP Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, logging bootstrap, and error handling for the ELTP workspace.
//!
//! # Overview
//!
//! - **Types**: pipeline [`types::Step`] and datalake path joining
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` variables
//! - **Errors**: [`CommonError`] and its result alias
//!
//! # Example
//!
//! ```no_run
//! use eltp_common::logging::{init_logging, LogConfig};
//! use eltp_common::types::{join_path, Step};
//!
//! fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::from_env()?)?;
//!     let folder = join_path(&["datalake", "12", Step::Extract.as_str()]);
//!     tracing::info!(%folder, "Resolved folder");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CommonError, Result};
pub use types::{join_path, Step, CONTEXT_FILE_NAME};
