//! Persistence seam for jobs, datasets and evaluations.

use crate::dataset::{Dataset, NewDataset};
use crate::evaluation::{Evaluation, EvaluationUpdate, NewEvaluation};
use crate::job::{DatasetId, EvaluationId, Job, JobId, JobUpdate, NewJob, RunStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("invalid record: {0}")]
    InvalidData(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable store for jobs, datasets and evaluations.
///
/// `update_job` returns `false` when the record is missing or the update's
/// status guard does not match.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn create_job(&self, job: NewJob) -> StoreResult<Job>;
    async fn get_job(&self, id: JobId) -> StoreResult<Option<Job>>;
    async fn update_job(&self, id: JobId, update: &JobUpdate) -> StoreResult<bool>;
    async fn delete_job(&self, id: JobId) -> StoreResult<bool>;
    /// All jobs, newest first.
    async fn list_jobs(&self) -> StoreResult<Vec<Job>>;

    async fn list_jobs_with_status(&self, status: RunStatus) -> StoreResult<Vec<Job>> {
        let jobs = self.list_jobs().await?;
        Ok(jobs.into_iter().filter(|job| job.status == status).collect())
    }

    async fn create_dataset(&self, dataset: NewDataset) -> StoreResult<Dataset>;
    async fn get_dataset(&self, id: DatasetId) -> StoreResult<Option<Dataset>>;
    async fn list_datasets(&self) -> StoreResult<Vec<Dataset>>;
    async fn delete_dataset(&self, id: DatasetId) -> StoreResult<bool>;

    async fn create_evaluation(&self, evaluation: NewEvaluation) -> StoreResult<Evaluation>;
    async fn get_evaluation(&self, id: EvaluationId) -> StoreResult<Option<Evaluation>>;
    async fn update_evaluation(
        &self,
        id: EvaluationId,
        update: &EvaluationUpdate,
    ) -> StoreResult<bool>;
    async fn list_evaluations(&self) -> StoreResult<Vec<Evaluation>>;
    async fn delete_evaluation(&self, id: EvaluationId) -> StoreResult<bool>;
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: i64,
    jobs: BTreeMap<JobId, Job>,
    datasets: BTreeMap<DatasetId, Dataset>,
    evaluations: BTreeMap<EvaluationId, Evaluation>,
}

impl MemoryState {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-process store used by tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    state: RwLock<MemoryState>,
}

impl MemoryJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, job: NewJob) -> StoreResult<Job> {
        let mut state = self.state.write().await;
        let id = JobId(state.allocate());
        let record = Job {
            id,
            target_name: job.target_name(),
            name: job.name,
            version: job.version,
            job_type: job.job_type,
            base_model: job.base_model,
            config: job.config,
            status: RunStatus::Pending,
            progress: 0.0,
            resolved_artifact: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        state.jobs.insert(id, record.clone());
        Ok(record)
    }

    async fn get_job(&self, id: JobId) -> StoreResult<Option<Job>> {
        Ok(self.state.read().await.jobs.get(&id).cloned())
    }

    async fn update_job(&self, id: JobId, update: &JobUpdate) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(state.jobs.get_mut(&id).is_some_and(|job| update.apply_to(job)))
    }

    async fn delete_job(&self, id: JobId) -> StoreResult<bool> {
        Ok(self.state.write().await.jobs.remove(&id).is_some())
    }

    async fn list_jobs(&self) -> StoreResult<Vec<Job>> {
        let state = self.state.read().await;
        let mut jobs: Vec<Job> = state.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(jobs)
    }

    async fn create_dataset(&self, dataset: NewDataset) -> StoreResult<Dataset> {
        let mut state = self.state.write().await;
        let id = DatasetId(state.allocate());
        let record = Dataset {
            id,
            metadata: dataset.metadata(),
            sample_count: dataset.samples.len() as i64,
            name: dataset.name,
            description: dataset.description,
            created_at: Utc::now(),
        };
        state.datasets.insert(id, record.clone());
        Ok(record)
    }

    async fn get_dataset(&self, id: DatasetId) -> StoreResult<Option<Dataset>> {
        Ok(self.state.read().await.datasets.get(&id).cloned())
    }

    async fn list_datasets(&self) -> StoreResult<Vec<Dataset>> {
        Ok(self.state.read().await.datasets.values().cloned().collect())
    }

    async fn delete_dataset(&self, id: DatasetId) -> StoreResult<bool> {
        Ok(self.state.write().await.datasets.remove(&id).is_some())
    }

    async fn create_evaluation(&self, evaluation: NewEvaluation) -> StoreResult<Evaluation> {
        let mut state = self.state.write().await;
        let id = EvaluationId(state.allocate());
        let record = Evaluation {
            id,
            job_id: evaluation.job_id,
            model_name: evaluation.model_name,
            base_model: evaluation.base_model,
            dataset_id: evaluation.dataset_id,
            kind: evaluation.kind,
            status: RunStatus::Pending,
            before_metrics: None,
            after_metrics: None,
            improvement: None,
            notes: evaluation.notes,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        state.evaluations.insert(id, record.clone());
        Ok(record)
    }

    async fn get_evaluation(&self, id: EvaluationId) -> StoreResult<Option<Evaluation>> {
        Ok(self.state.read().await.evaluations.get(&id).cloned())
    }

    async fn update_evaluation(
        &self,
        id: EvaluationId,
        update: &EvaluationUpdate,
    ) -> StoreResult<bool> {
        let mut state = self.state.write().await;
        Ok(state.evaluations.get_mut(&id).map(|evaluation| update.apply_to(evaluation)).is_some())
    }

    async fn list_evaluations(&self) -> StoreResult<Vec<Evaluation>> {
        let state = self.state.read().await;
        let mut evaluations: Vec<Evaluation> = state.evaluations.values().cloned().collect();
        evaluations.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(evaluations)
    }

    async fn delete_evaluation(&self, id: EvaluationId) -> StoreResult<bool> {
        Ok(self.state.write().await.evaluations.remove(&id).is_some())
    }
}
