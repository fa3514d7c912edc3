//! Configuration management

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::stage::extract::ExtractSettings;
use crate::stage::load::LoadSettings;
use crate::stage::post_process::PostProcessSettings;
use crate::storage::config::StorageConfig;
use crate::visit::VisitSettings;
use crate::warehouse::WarehouseConfig;

// ============================================================================
// Pipeline Configuration Constants
// ============================================================================

/// Default provenance database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/eltp";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 5;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default root folder of client drop zones.
pub const DEFAULT_FTP_PREFIX: &str = "ftp";

/// Default root folder of stage artifacts.
pub const DEFAULT_DATALAKE_PREFIX: &str = "datalake";

/// Path roots for source folders and datalake artifacts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathConfig {
    pub ftp_prefix: String,
    pub datalake_prefix: String,
}

impl PathConfig {
    pub fn from_env() -> Self {
        Self {
            ftp_prefix: std::env::var("ELTP_FTP_PREFIX")
                .unwrap_or_else(|_| DEFAULT_FTP_PREFIX.to_string()),
            datalake_prefix: std::env::var("ELTP_DATALAKE_PREFIX")
                .unwrap_or_else(|_| DEFAULT_DATALAKE_PREFIX.to_string()),
        }
    }
}

/// Provenance database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("DATABASE_URL").unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DATABASE_MAX_CONNECTIONS),
            connect_timeout_secs: std::env::var("DATABASE_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
        }
    }
}

/// Everything a stage invocation needs, built once by the entry point
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub paths: PathConfig,
    pub extract: ExtractSettings,
    pub visit: VisitSettings,
    pub load: LoadSettings,
    pub post_process: PostProcessSettings,
    pub warehouse: WarehouseConfig,
}

impl PipelineConfig {
    /// Load configuration from `.env`, the environment and defaults
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self::from_env()?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            database: DatabaseConfig::from_env(),
            storage: StorageConfig::from_env()?,
            paths: PathConfig::from_env(),
            extract: ExtractSettings::from_env()?,
            visit: VisitSettings::from_env(),
            load: LoadSettings::from_env(),
            post_process: PostProcessSettings::from_env(),
            warehouse: WarehouseConfig::from_env(),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.database.max_connections == 0 {
            anyhow::bail!("Database max_connections must be greater than 0");
        }

        if self.storage.bucket.is_empty() {
            anyhow::bail!("Datalake bucket cannot be empty");
        }

        if self.paths.datalake_prefix.trim_matches('/').is_empty() {
            tracing::warn!("No datalake prefix configured - artifacts land at the bucket root");
        }

        if self.extract.schedule_window.is_zero() {
            anyhow::bail!("Schedule window must be greater than 0");
        }

        if self.visit.allowed_extensions.is_empty() {
            anyhow::bail!("At least one allowed file extension is required");
        }

        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            storage: StorageConfig::default(),
            paths: PathConfig {
                ftp_prefix: DEFAULT_FTP_PREFIX.to_string(),
                datalake_prefix: DEFAULT_DATALAKE_PREFIX.to_string(),
            },
            extract: ExtractSettings::default(),
            visit: VisitSettings::default(),
            load: LoadSettings::default(),
            post_process: PostProcessSettings::default(),
            warehouse: WarehouseConfig::default(),
        }
    }
}
