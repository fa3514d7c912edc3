//! In-memory provenance store for tests and dry runs

use async_trait::async_trait;
use eltp_common::Step;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

use super::{ProvenanceError, ProvenanceResult, ProvenanceStore};
use crate::models::{Datasource, DatasourceDataset, NewDatasourceDataset};

#[derive(Debug, Default)]
struct State {
    datasources: HashMap<i64, Datasource>,
    tasks: HashMap<i64, i64>,
    /// Insertion order doubles as creation order
    datasets: Vec<DatasourceDataset>,
}

#[derive(Debug, Default)]
pub struct InMemoryProvenanceStore {
    state: Mutex<State>,
}

impl InMemoryProvenanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_datasource(&self, datasource: Datasource) {
        self.lock().datasources.insert(datasource.id, datasource);
    }

    /// Points scheduler task `task_id` at `datasource_id`
    pub fn add_task(&self, task_id: i64, datasource_id: i64) {
        self.lock().tasks.insert(task_id, datasource_id);
    }

    pub fn datasets(&self) -> Vec<DatasourceDataset> {
        self.lock().datasets.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ProvenanceStore for InMemoryProvenanceStore {
    async fn get_datasource(&self, task_id: i64) -> ProvenanceResult<Datasource> {
        let state = self.lock();
        let datasource_id = state
            .tasks
            .get(&task_id)
            .ok_or_else(|| ProvenanceError::not_found("Datahub task", task_id))?;

        let mut datasource = state
            .datasources
            .get(datasource_id)
            .cloned()
            .ok_or_else(|| ProvenanceError::not_found("Datasource", datasource_id))?;
        datasource.protocols.sort_by_key(|p| p.id);

        Ok(datasource)
    }

    async fn save_dataset(&self, record: NewDatasourceDataset) -> ProvenanceResult<DatasourceDataset> {
        let dataset = record.into_dataset();
        self.lock().datasets.push(dataset.clone());
        Ok(dataset)
    }

    async fn update_dataset(&self, dataset: &DatasourceDataset) -> ProvenanceResult<()> {
        let mut state = self.lock();
        let stored = state
            .datasets
            .iter_mut()
            .find(|d| d.id == dataset.id)
            .ok_or_else(|| ProvenanceError::not_found("Dataset", dataset.id))?;
        *stored = dataset.clone();
        Ok(())
    }

    async fn get_dataset(&self, id: Uuid) -> ProvenanceResult<Option<DatasourceDataset>> {
        Ok(self.lock().datasets.iter().find(|d| d.id == id).cloned())
    }

    async fn pending_datasets(
        &self,
        datasource_id: i64,
        step: Step,
    ) -> ProvenanceResult<Vec<DatasourceDataset>> {
        let state = self.lock();
        let protocol_ids: Vec<i64> = state
            .datasources
            .get(&datasource_id)
            .map(|d| d.protocols.iter().map(|p| p.id).collect())
            .unwrap_or_default();

        Ok(state
            .datasets
            .iter()
            .filter(|d| protocol_ids.contains(&d.datasource_protocol_id) && d.is_pending(step))
            .cloned()
            .collect())
    }
}
