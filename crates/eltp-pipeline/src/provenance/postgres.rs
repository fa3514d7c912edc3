//! PostgreSQL provenance store

use async_trait::async_trait;
use eltp_common::Step;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{ProvenanceError, ProvenanceResult, ProvenanceStore};
use crate::config::DatabaseConfig;
use crate::models::dataset::timestamp_column;
use crate::models::{Datasource, DatasourceDataset, DatasourceProtocol, NewDatasourceDataset};

const DATASET_COLUMNS: &str = "id, organisation_id, datasource_protocol_id, data_path_source, \
     data_path_archive, process_e_timestamp, process_t_timestamp, process_l_timestamp, \
     process_p_timestamp, process_post_protocol, process_post_source";

#[derive(Debug, sqlx::FromRow)]
struct DatasourceRow {
    id: i64,
    organisation_id: i64,
    name: String,
    enabled: bool,
    interface_type: i32,
}

#[derive(Debug, Clone)]
pub struct PgProvenanceStore {
    pool: PgPool,
}

impl PgProvenanceStore {
    /// Creates the store without connecting; the first query opens the pool.
    pub fn connect_lazy(config: &DatabaseConfig) -> ProvenanceResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connect_timeout())
            .connect_lazy(&config.url)?;

        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn classify(err: sqlx::Error) -> ProvenanceError {
    let corrupt = matches!(
        err,
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) | sqlx::Error::Decode(_)
    );

    if corrupt {
        ProvenanceError::Corrupt(err.to_string())
    } else {
        ProvenanceError::Database(err)
    }
}

#[async_trait]
impl ProvenanceStore for PgProvenanceStore {
    #[instrument(skip(self))]
    async fn get_datasource(&self, task_id: i64) -> ProvenanceResult<Datasource> {
        let row = sqlx::query_as::<_, DatasourceRow>(
            r#"
            SELECT d.id, d.organisation_id, d.name, d.enabled, d.interface_type
            FROM datahub_task t
            JOIN datasource d ON d.id = t.datasource_id
            WHERE t.id = $1
            "#,
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(classify)?
        .ok_or_else(|| ProvenanceError::not_found("Datahub task", task_id))?;

        let protocols = sqlx::query_as::<_, DatasourceProtocol>(
            r#"
            SELECT p.id, p.datasource_id, d.organisation_id, p.data_path, p.data_file,
                   p.protocol_period, p.source_period, p.enabled
            FROM datasource_protocol p
            JOIN datasource d ON d.id = p.datasource_id
            WHERE p.datasource_id = $1
            ORDER BY p.id
            "#,
        )
        .bind(row.id)
        .fetch_all(&self.pool)
        .await
        .map_err(classify)?;

        debug!(
            datasource_id = row.id,
            protocols = protocols.len(),
            "Resolved datasource for task"
        );

        Ok(Datasource {
            id: row.id,
            organisation_id: row.organisation_id,
            name: row.name,
            enabled: row.enabled,
            interface_type: row.interface_type,
            protocols,
        })
    }

    #[instrument(skip(self, record), fields(protocol_id = record.datasource_protocol_id))]
    async fn save_dataset(&self, record: NewDatasourceDataset) -> ProvenanceResult<DatasourceDataset> {
        let id = record.id.unwrap_or_else(Uuid::new_v4);

        let sql = format!(
            r#"
            INSERT INTO datasource_dataset (
                id, organisation_id, datasource_protocol_id,
                data_path_source, data_path_archive, process_e_timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            DATASET_COLUMNS
        );

        let dataset = sqlx::query_as::<_, DatasourceDataset>(&sql)
            .bind(id)
            .bind(record.organisation_id)
            .bind(record.datasource_protocol_id)
            .bind(&record.data_path_source)
            .bind(&record.data_path_archive)
            .bind(record.process_e_timestamp)
            .fetch_one(&self.pool)
            .await
            .map_err(classify)?;

        debug!(dataset_id = %dataset.id, "Saved dataset");

        Ok(dataset)
    }

    #[instrument(skip(self, dataset), fields(dataset_id = %dataset.id))]
    async fn update_dataset(&self, dataset: &DatasourceDataset) -> ProvenanceResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE datasource_dataset
            SET organisation_id = $2,
                datasource_protocol_id = $3,
                data_path_source = $4,
                data_path_archive = $5,
                process_e_timestamp = $6,
                process_t_timestamp = $7,
                process_l_timestamp = $8,
                process_p_timestamp = $9,
                process_post_protocol = $10,
                process_post_source = $11
            WHERE id = $1
            "#,
        )
        .bind(dataset.id)
        .bind(dataset.organisation_id)
        .bind(dataset.datasource_protocol_id)
        .bind(&dataset.data_path_source)
        .bind(&dataset.data_path_archive)
        .bind(dataset.process_e_timestamp)
        .bind(dataset.process_t_timestamp)
        .bind(dataset.process_l_timestamp)
        .bind(dataset.process_p_timestamp)
        .bind(dataset.process_post_protocol)
        .bind(dataset.process_post_source)
        .execute(&self.pool)
        .await
        .map_err(classify)?;

        if result.rows_affected() == 0 {
            return Err(ProvenanceError::not_found("Dataset", dataset.id));
        }

        Ok(())
    }

    async fn get_dataset(&self, id: Uuid) -> ProvenanceResult<Option<DatasourceDataset>> {
        let sql = format!("SELECT {} FROM datasource_dataset WHERE id = $1", DATASET_COLUMNS);

        sqlx::query_as::<_, DatasourceDataset>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(classify)
    }

    #[instrument(skip(self))]
    async fn pending_datasets(
        &self,
        datasource_id: i64,
        step: Step,
    ) -> ProvenanceResult<Vec<DatasourceDataset>> {
        let Some(previous) = step.previous() else {
            return Ok(Vec::new());
        };

        let columns = DATASET_COLUMNS
            .split(", ")
            .map(|column| format!("ds.{}", column.trim()))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            r#"
            SELECT {columns}
            FROM datasource_dataset ds
            JOIN datasource_protocol p ON p.id = ds.datasource_protocol_id
            WHERE p.datasource_id = $1
              AND ds.data_path_source IS NOT NULL
              AND ds.{done} IS NOT NULL
              AND ds.{todo} IS NULL
            ORDER BY ds.created_at, ds.id
            "#,
            columns = columns,
            done = timestamp_column(previous),
            todo = timestamp_column(step),
        );

        sqlx::query_as::<_, DatasourceDataset>(&sql)
            .bind(datasource_id)
            .fetch_all(&self.pool)
            .await
            .map_err(classify)
    }
}
