//! Shared mocks and fixtures for orchestrator integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use refinery_abstraction::{
    ArtifactSpec, BackendError, BackendResult, KnowledgeRecord, KnowledgeStore, ModelBackend,
};
use refinery_orchestrator::{EngineServices, JobOrchestrator, OrchestratorConfig};
use refinery_training::{
    AdapterOutput, AdapterTrainer, AdapterTrainingRequest, Dataset, DatasetId, Evaluation,
    EvaluationId, EvaluationLauncher, EvaluationUpdate, Job, JobId, JobStore, JobType, JobUpdate,
    MemoryJobStore, NewDataset, NewEvaluation, NewJob, ProgressEvent, ProgressSink, RunStatus,
    StoreError, StoreResult, TrainingError, TrainingMetrics, TrainingResult, WorkspaceLayout,
};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::Notify;

/// Model backend that keeps artifacts in a set.
#[derive(Default)]
pub struct MockBackend {
    pub builds: Mutex<Vec<ArtifactSpec>>,
    pub removed: Mutex<Vec<String>>,
    pub known: Mutex<HashSet<String>>,
    pub fail_build: AtomicBool,
    pub fail_remove: AtomicBool,
}

impl MockBackend {
    pub fn forget(&self, name: &str) {
        self.known.lock().unwrap().remove(name);
    }
}

#[async_trait]
impl ModelBackend for MockBackend {
    fn id(&self) -> &'static str {
        "mock"
    }

    async fn build(&self, spec: &ArtifactSpec) -> BackendResult<String> {
        if self.fail_build.load(Ordering::SeqCst) {
            return Err(BackendError::CommandFailed {
                command: format!("create {}", spec.name),
                status: "exit status: 1".to_string(),
                stderr: "model base not found".to_string(),
            });
        }
        self.builds.lock().unwrap().push(spec.clone());
        self.known.lock().unwrap().insert(spec.name.clone());
        Ok(spec.name.clone())
    }

    async fn remove(&self, name: &str) -> BackendResult<bool> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(BackendError::Other("backend offline".to_string()));
        }
        self.removed.lock().unwrap().push(name.to_string());
        Ok(self.known.lock().unwrap().remove(name))
    }

    async fn query(&self, name: &str, prompt: &str) -> BackendResult<String> {
        Ok(format!("{name}: {prompt}"))
    }

    async fn exists(&self, name: &str) -> BackendResult<bool> {
        Ok(self.known.lock().unwrap().contains(name))
    }
}

/// Knowledge store backed by a map of collections.
#[derive(Default)]
pub struct MockKnowledgeStore {
    pub collections: Mutex<HashMap<String, Vec<KnowledgeRecord>>>,
    pub reject: AtomicBool,
    pub fail_delete: AtomicBool,
}

impl MockKnowledgeStore {
    pub fn records(&self, collection: &str) -> Option<Vec<KnowledgeRecord>> {
        self.collections.lock().unwrap().get(collection).cloned()
    }
}

#[async_trait]
impl KnowledgeStore for MockKnowledgeStore {
    async fn ingest(&self, collection: &str, records: &[KnowledgeRecord]) -> BackendResult<bool> {
        if self.reject.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .extend_from_slice(records);
        Ok(true)
    }

    async fn query(
        &self,
        collection: &str,
        _text: &str,
        limit: usize,
    ) -> BackendResult<Vec<KnowledgeRecord>> {
        Ok(self.records(collection).unwrap_or_default().into_iter().take(limit).collect())
    }

    async fn delete(&self, collection: &str) -> BackendResult<bool> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(BackendError::Request("vector store unreachable".to_string()));
        }
        Ok(self.collections.lock().unwrap().remove(collection).is_some())
    }
}

/// Trainer that reports scripted fractions and writes a fake adapter.
pub struct MockTrainer {
    pub fractions: Vec<f64>,
    pub fail: Option<String>,
    /// When set, training blocks until the gate is notified.
    pub gate: Option<Arc<Notify>>,
    pub started: Arc<Notify>,
    pub finished: AtomicUsize,
}

impl Default for MockTrainer {
    fn default() -> Self {
        Self {
            fractions: vec![0.25, 0.5, 1.0],
            fail: None,
            gate: None,
            started: Arc::new(Notify::new()),
            finished: AtomicUsize::new(0),
        }
    }
}

impl MockTrainer {
    pub fn gated() -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        (Self { gate: Some(Arc::clone(&gate)), ..Self::default() }, gate)
    }
}

#[async_trait]
impl AdapterTrainer for MockTrainer {
    fn id(&self) -> &'static str {
        "mock"
    }

    async fn train(
        &self,
        request: &AdapterTrainingRequest,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<AdapterOutput> {
        self.started.notify_one();
        progress.on_event(ProgressEvent::Started { job_id: request.job_id });
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        for value in &self.fractions {
            progress.on_event(ProgressEvent::Fraction { job_id: request.job_id, value: *value });
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail {
            return Err(TrainingError::Trainer(message.clone()));
        }

        std::fs::create_dir_all(&request.output_dir)?;
        std::fs::write(request.output_dir.join("adapter_model.bin"), b"weights")?;
        progress.on_event(ProgressEvent::Finished { job_id: request.job_id });
        Ok(AdapterOutput {
            adapter_dir: request.output_dir.clone(),
            metrics: TrainingMetrics { final_loss: Some(0.42), steps: Some(30) },
        })
    }
}

/// Evaluation launcher that records what it was asked to run.
#[derive(Default)]
pub struct MockLauncher {
    pub launched: Mutex<Vec<Evaluation>>,
    pub fail: AtomicBool,
}

#[async_trait]
impl EvaluationLauncher for MockLauncher {
    async fn launch(&self, evaluation: &Evaluation) -> TrainingResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TrainingError::Trainer("evaluator unavailable".to_string()));
        }
        self.launched.lock().unwrap().push(evaluation.clone());
        Ok(())
    }
}

/// Memory store that records progress writes and can fail deletions.
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryJobStore,
    pub progress_writes: Mutex<Vec<(JobId, f64)>>,
    pub fail_delete: AtomicBool,
}

impl RecordingStore {
    pub fn progress_for(&self, id: JobId) -> Vec<f64> {
        self.progress_writes
            .lock()
            .unwrap()
            .iter()
            .filter(|(job, _)| *job == id)
            .map(|(_, p)| *p)
            .collect()
    }
}

#[async_trait]
impl JobStore for RecordingStore {
    async fn create_job(&self, job: NewJob) -> StoreResult<Job> {
        self.inner.create_job(job).await
    }

    async fn get_job(&self, id: JobId) -> StoreResult<Option<Job>> {
        self.inner.get_job(id).await
    }

    async fn update_job(&self, id: JobId, update: &JobUpdate) -> StoreResult<bool> {
        let applied = self.inner.update_job(id, update).await?;
        if applied && let Some(progress) = update.progress {
            self.progress_writes.lock().unwrap().push((id, progress));
        }
        Ok(applied)
    }

    async fn delete_job(&self, id: JobId) -> StoreResult<bool> {
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("database is locked".to_string()));
        }
        self.inner.delete_job(id).await
    }

    async fn list_jobs(&self) -> StoreResult<Vec<Job>> {
        self.inner.list_jobs().await
    }

    async fn create_dataset(&self, dataset: NewDataset) -> StoreResult<Dataset> {
        self.inner.create_dataset(dataset).await
    }

    async fn get_dataset(&self, id: DatasetId) -> StoreResult<Option<Dataset>> {
        self.inner.get_dataset(id).await
    }

    async fn list_datasets(&self) -> StoreResult<Vec<Dataset>> {
        self.inner.list_datasets().await
    }

    async fn delete_dataset(&self, id: DatasetId) -> StoreResult<bool> {
        self.inner.delete_dataset(id).await
    }

    async fn create_evaluation(&self, evaluation: NewEvaluation) -> StoreResult<Evaluation> {
        self.inner.create_evaluation(evaluation).await
    }

    async fn get_evaluation(&self, id: EvaluationId) -> StoreResult<Option<Evaluation>> {
        self.inner.get_evaluation(id).await
    }

    async fn update_evaluation(
        &self,
        id: EvaluationId,
        update: &EvaluationUpdate,
    ) -> StoreResult<bool> {
        self.inner.update_evaluation(id, update).await
    }

    async fn list_evaluations(&self) -> StoreResult<Vec<Evaluation>> {
        self.inner.list_evaluations().await
    }

    async fn delete_evaluation(&self, id: EvaluationId) -> StoreResult<bool> {
        self.inner.delete_evaluation(id).await
    }
}

/// All mocks plus a temporary workspace.
pub struct Harness {
    pub store: Arc<RecordingStore>,
    pub backend: Arc<MockBackend>,
    pub knowledge: Arc<MockKnowledgeStore>,
    pub trainer: Arc<MockTrainer>,
    pub launcher: Arc<MockLauncher>,
    pub workspace: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_trainer(MockTrainer::default())
    }

    pub fn with_trainer(trainer: MockTrainer) -> Self {
        Self {
            store: Arc::new(RecordingStore::default()),
            backend: Arc::new(MockBackend::default()),
            knowledge: Arc::new(MockKnowledgeStore::default()),
            trainer: Arc::new(trainer),
            launcher: Arc::new(MockLauncher::default()),
            workspace: TempDir::new().unwrap(),
        }
    }

    pub fn layout(&self) -> WorkspaceLayout {
        WorkspaceLayout::new(self.workspace.path())
    }

    pub fn services(&self) -> EngineServices {
        EngineServices {
            store: self.store.clone(),
            backend: self.backend.clone(),
            knowledge: self.knowledge.clone(),
            trainer: self.trainer.clone(),
            evaluations: self.launcher.clone(),
            layout: self.layout(),
        }
    }

    pub fn orchestrator(&self) -> JobOrchestrator {
        self.orchestrator_with(OrchestratorConfig::default())
    }

    pub fn orchestrator_with(&self, config: OrchestratorConfig) -> JobOrchestrator {
        JobOrchestrator::new(self.services(), config)
    }

    /// Dataset with `valid` usable samples followed by `invalid` unusable ones.
    pub async fn dataset(&self, name: &str, valid: usize, invalid: usize) -> Dataset {
        let mut samples = Vec::new();
        for i in 0..valid {
            samples.push(json!({
                "instruction": format!("Explain concept {i}"),
                "input": "",
                "output": format!("Concept {i} explained"),
            }));
        }
        for i in 0..invalid {
            samples.push(json!({ "label": i }));
        }
        self.store
            .create_dataset(NewDataset { name: name.to_string(), description: None, samples })
            .await
            .unwrap()
    }

    pub async fn job(&self, name: &str, job_type: JobType, datasets: &[DatasetId]) -> Job {
        let ids: Vec<i64> = datasets.iter().map(|d| d.0).collect();
        self.store
            .create_job(
                NewJob::new(name, job_type, "llama3:8b")
                    .with_version("1.0")
                    .with_config(json!({ "selectedDatasets": ids })),
            )
            .await
            .unwrap()
    }

    pub async fn reload(&self, id: JobId) -> Job {
        self.store.get_job(id).await.unwrap().unwrap()
    }

    /// Polls until the job leaves `RUNNING` or the timeout elapses.
    pub async fn settle(&self, id: JobId) -> Job {
        for _ in 0..200 {
            let job = self.reload(id).await;
            if job.status != RunStatus::Running {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.reload(id).await
    }
}
