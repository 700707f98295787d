use crate::error::TrainingResult;
use crate::job::JobId;
use crate::naming::artifact_dir_name;
use std::path::{Path, PathBuf};

/// Filesystem layout for job working state inside a workspace.
///
/// ```text
/// <root>/training_data/job_<id>/{train,val}.jsonl
/// <root>/models/<artifact dir>/Modelfile
/// <root>/models/job_<id>_lora/
/// ```
#[derive(Debug, Clone)]
pub struct WorkspaceLayout {
    root: PathBuf,
}

impl WorkspaceLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn training_data_dir(&self, job_id: JobId) -> PathBuf {
        self.root.join("training_data").join(format!("job_{job_id}"))
    }

    #[must_use]
    pub fn train_path(&self, job_id: JobId) -> PathBuf {
        self.training_data_dir(job_id).join("train.jsonl")
    }

    #[must_use]
    pub fn val_path(&self, job_id: JobId) -> PathBuf {
        self.training_data_dir(job_id).join("val.jsonl")
    }

    #[must_use]
    pub fn manifest_path(&self, job_id: JobId) -> PathBuf {
        self.training_data_dir(job_id).join("manifest.json")
    }

    #[must_use]
    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    /// On-disk directory for an artifact; `:` and `/` in the name become `_`.
    #[must_use]
    pub fn artifact_dir(&self, artifact_name: &str) -> PathBuf {
        self.models_dir().join(artifact_dir_name(artifact_name))
    }

    /// Output directory for adapter weights produced by a job's trainer.
    /// Keyed on the job so two versions of one target never share weights.
    #[must_use]
    pub fn adapter_dir(&self, job_id: JobId) -> PathBuf {
        self.models_dir().join(format!("job_{job_id}_lora"))
    }

    /// Retrieval collection owned by a knowledge-augmentation job.
    #[must_use]
    pub fn collection_name(job_id: JobId) -> String {
        format!("knowledge_base_job_{job_id}")
    }

    pub fn ensure_job_dirs(&self, job_id: JobId) -> TrainingResult<()> {
        std::fs::create_dir_all(self.training_data_dir(job_id))?;
        std::fs::create_dir_all(self.models_dir())?;
        Ok(())
    }
}
