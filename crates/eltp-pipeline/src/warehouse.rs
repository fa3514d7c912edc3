//! Redshift warehouse adapter
//!
//! Redshift speaks the Postgres wire protocol, so a `sqlx` Postgres pool
//! carries `COPY`, `UNLOAD` and plain queries. Bulk transfers go through S3
//! and are authorised by an IAM role attached to the cluster.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo};
use std::time::Duration;
use tracing::{debug, instrument, warn};

use crate::capability::{JsonRow, StorageCapability, WarehouseError};

pub const DEFAULT_WAREHOUSE_MAX_CONNECTIONS: u32 = 2;
pub const DEFAULT_WAREHOUSE_CONNECT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarehouseConfig {
    pub url: Option<String>,
    pub iam_role: Option<String>,
}

impl WarehouseConfig {
    /// `WAREHOUSE_URL`, `WAREHOUSE_IAM_ROLE`
    pub fn from_env() -> Self {
        Self {
            url: std::env::var("WAREHOUSE_URL").ok(),
            iam_role: std::env::var("WAREHOUSE_IAM_ROLE").ok(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RedshiftWarehouse {
    pool: PgPool,
    iam_role: String,
}

impl RedshiftWarehouse {
    /// Creates the adapter without connecting
    pub fn connect_lazy(config: &WarehouseConfig) -> Result<Self, WarehouseError> {
        let url = config.url.as_deref().ok_or_else(|| {
            WarehouseError::StorageUnavailable("WAREHOUSE_URL not configured".to_string())
        })?;
        let iam_role = config.iam_role.clone().ok_or_else(|| {
            WarehouseError::StorageUnavailable("WAREHOUSE_IAM_ROLE not configured".to_string())
        })?;

        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_WAREHOUSE_MAX_CONNECTIONS)
            .acquire_timeout(Duration::from_secs(DEFAULT_WAREHOUSE_CONNECT_TIMEOUT_SECS))
            .connect_lazy(url)
            .map_err(classify)?;

        Ok(Self { pool, iam_role })
    }

    fn copy_statement(&self, table: &str, source: &str) -> Result<String, WarehouseError> {
        validate_table(table)?;
        Ok(format!(
            "COPY {} FROM '{}' IAM_ROLE '{}' FORMAT AS CSV IGNOREHEADER 1",
            table,
            quote_literal(source),
            quote_literal(&self.iam_role)
        ))
    }

    fn unload_statement(&self, query: &str, destination: &str) -> String {
        format!(
            "UNLOAD ('{}') TO '{}' IAM_ROLE '{}' FORMAT AS CSV HEADER ALLOWOVERWRITE",
            quote_literal(query),
            quote_literal(destination),
            quote_literal(&self.iam_role)
        )
    }
}

#[async_trait]
impl StorageCapability for RedshiftWarehouse {
    #[instrument(skip(self))]
    async fn load(&self, table: &str, source: &str) -> Result<u64, WarehouseError> {
        let statement = self.copy_statement(table, source)?;
        let result = sqlx::query(&statement)
            .execute(&self.pool)
            .await
            .map_err(classify)?;

        debug!(rows = result.rows_affected(), "COPY complete");

        Ok(result.rows_affected())
    }

    #[instrument(skip(self, query))]
    async fn unload(&self, query: &str, destination: &str) -> Result<(), WarehouseError> {
        sqlx::query(&self.unload_statement(query, destination))
            .execute(&self.pool)
            .await
            .map_err(classify)?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn retrieve(&self, query: &str) -> Result<Vec<JsonRow>, WarehouseError> {
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)?;

        rows.iter().map(row_to_json).collect()
    }
}

fn classify(err: sqlx::Error) -> WarehouseError {
    match &err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Configuration(_) => WarehouseError::StorageUnavailable(err.to_string()),
        _ => WarehouseError::StorageOperationFailed(err.to_string()),
    }
}

/// `schema.table` or `table`, plain identifiers only
fn validate_table(table: &str) -> Result<(), WarehouseError> {
    let valid_part = |part: &str| {
        let mut chars = part.chars();
        chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    };

    let parts: Vec<&str> = table.split('.').collect();
    if parts.len() <= 2 && parts.iter().all(|p| valid_part(p)) {
        Ok(())
    } else {
        Err(WarehouseError::StorageOperationFailed(format!(
            "invalid table name '{}'",
            table
        )))
    }
}

fn quote_literal(value: &str) -> String {
    value.replace('\'', "''")
}

fn row_to_json(row: &PgRow) -> Result<JsonRow, WarehouseError> {
    let mut object = Map::new();
    for column in row.columns() {
        let index = column.ordinal();
        let decode_failed = |e: sqlx::Error| {
            WarehouseError::StorageOperationFailed(format!("{}: {}", column.name(), e))
        };

        let value = match column.type_info().name() {
            "BOOL" => row
                .try_get::<Option<bool>, _>(index)
                .map_err(decode_failed)?
                .map(Value::Bool),
            "INT2" => row
                .try_get::<Option<i16>, _>(index)
                .map_err(decode_failed)?
                .map(Value::from),
            "INT4" => row
                .try_get::<Option<i32>, _>(index)
                .map_err(decode_failed)?
                .map(Value::from),
            "INT8" => row
                .try_get::<Option<i64>, _>(index)
                .map_err(decode_failed)?
                .map(Value::from),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(index)
                .map_err(decode_failed)?
                .and_then(|v| Number::from_f64(f64::from(v)).map(Value::Number)),
            "FLOAT8" => row
                .try_get::<Option<f64>, _>(index)
                .map_err(decode_failed)?
                .and_then(|v| Number::from_f64(v).map(Value::Number)),
            "JSON" | "JSONB" => row
                .try_get::<Option<Value>, _>(index)
                .map_err(decode_failed)?,
            "UUID" => row
                .try_get::<Option<uuid::Uuid>, _>(index)
                .map_err(decode_failed)?
                .map(|v| Value::String(v.to_string())),
            "DATE" => row
                .try_get::<Option<chrono::NaiveDate>, _>(index)
                .map_err(decode_failed)?
                .map(|v| Value::String(v.to_string())),
            "TIMESTAMP" => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(index)
                .map_err(decode_failed)?
                .map(|v| Value::String(v.to_string())),
            "TIMESTAMPTZ" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(index)
                .map_err(decode_failed)?
                .map(|v| Value::String(v.to_rfc3339())),
            other => match row.try_get::<Option<String>, _>(index) {
                Ok(text) => text.map(Value::String),
                Err(_) => {
                    warn!(
                        column = column.name(),
                        type_name = other,
                        "Unsupported column type, rendering null"
                    );
                    None
                },
            },
        };

        object.insert(column.name().to_string(), value.unwrap_or(Value::Null));
    }
    Ok(object)
}
