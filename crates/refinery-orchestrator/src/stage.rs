//! Pipeline stage contract and the per-job execution context.

use crate::error::StageError;
use crate::progress::ProgressReporter;
use crate::services::EngineServices;
use crate::stages::{
    Finalize, IngestKnowledgeBase, PackageArtifact, PrepareTrainingData, RunAdapterTraining,
    WriteBehaviorSpec,
};
use async_trait::async_trait;
use refinery_abstraction::ArtifactSpec;
use refinery_training::{AdapterOutput, Dataset, DatasetId, Job, JobConfig, JobType};
use std::sync::Arc;
use tracing::warn;

/// One unit of work in a job's pipeline.
#[async_trait]
pub trait PipelineStage: Send + Sync {
    /// Stage name used in logs and failure messages.
    fn name(&self) -> &'static str;

    /// Runs the stage.
    ///
    /// # Returns
    /// The job progress to persist once the stage has succeeded.
    async fn execute(&self, ctx: &mut StageContext) -> Result<f64, StageError>;
}

/// A job's configured datasets, split by whether the store still has them.
#[derive(Debug, Clone, Default)]
pub struct SelectedDatasets {
    pub found: Vec<Dataset>,
    pub missing: Vec<DatasetId>,
}

/// Mutable state threaded through a job's stages.
pub struct StageContext {
    pub job: Job,
    pub config: JobConfig,
    pub services: Arc<EngineServices>,
    pub reporter: ProgressReporter,
    pub verify_artifacts: bool,
    datasets: Option<SelectedDatasets>,
    /// Output of adapter training, if the pipeline trains one.
    pub adapter: Option<AdapterOutput>,
    /// Behavior spec for the artifact being packaged.
    pub artifact_spec: Option<ArtifactSpec>,
    /// Name returned by the backend's build.
    pub packaged_name: Option<String>,
    /// Name confirmed by the final stage.
    pub resolved_artifact: Option<String>,
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("job_id", &self.job.id)
            .field("packaged_name", &self.packaged_name)
            .field("resolved_artifact", &self.resolved_artifact)
            .finish_non_exhaustive()
    }
}

impl StageContext {
    #[must_use]
    pub fn new(
        job: Job,
        config: JobConfig,
        services: Arc<EngineServices>,
        verify_artifacts: bool,
    ) -> Self {
        let reporter = ProgressReporter::new(Arc::clone(&services.store), job.id, job.progress);
        Self {
            job,
            config,
            services,
            reporter,
            verify_artifacts,
            datasets: None,
            adapter: None,
            artifact_spec: None,
            packaged_name: None,
            resolved_artifact: None,
        }
    }

    /// Configured datasets, loaded once per job. Ids the store no longer has
    /// are logged and reported in `missing`.
    pub async fn datasets(&mut self) -> Result<&SelectedDatasets, StageError> {
        if self.datasets.is_none() {
            let mut selected = SelectedDatasets {
                found: Vec::with_capacity(self.config.selected_datasets.len()),
                missing: Vec::new(),
            };
            for id in &self.config.selected_datasets {
                match self.services.store.get_dataset(*id).await? {
                    Some(dataset) => selected.found.push(dataset),
                    None => {
                        warn!(job_id = %self.job.id, dataset_id = %id, "Configured dataset not found");
                        selected.missing.push(*id);
                    }
                }
            }
            self.datasets = Some(selected);
        }
        Ok(self.datasets.get_or_insert_with(SelectedDatasets::default))
    }
}

/// Ordered stages for a job type.
#[must_use]
pub fn pipeline_for(job_type: JobType) -> Vec<Box<dyn PipelineStage>> {
    match job_type {
        JobType::AdapterTuning => vec![
            Box::new(PrepareTrainingData),
            Box::new(RunAdapterTraining),
            Box::new(PackageArtifact::new(0.95)),
            Box::new(Finalize),
        ],
        JobType::KnowledgeAugmentation => vec![
            Box::new(WriteBehaviorSpec),
            Box::new(IngestKnowledgeBase),
            Box::new(PackageArtifact::new(0.9)),
            Box::new(Finalize),
        ],
    }
}
