use crate::error::TrainingResult;
use crate::job::{HyperParameters, JobId};
use crate::progress::ProgressSink;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Everything a trainer needs to produce adapter weights for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterTrainingRequest {
    pub job_id: JobId,
    pub base_model: String,
    pub target_name: String,
    pub train_path: PathBuf,
    pub val_path: PathBuf,
    pub output_dir: PathBuf,
    pub hyperparameters: HyperParameters,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub final_loss: Option<f64>,
    pub steps: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdapterOutput {
    /// Directory holding the trained adapter weights.
    pub adapter_dir: PathBuf,
    #[serde(default)]
    pub metrics: TrainingMetrics,
}

/// Produces adapter weights. Implementations report fractional progress
/// through `progress`; the engine maps it into the stage's window.
#[async_trait]
pub trait AdapterTrainer: Send + Sync {
    fn id(&self) -> &'static str;

    async fn train(
        &self,
        request: &AdapterTrainingRequest,
        progress: &dyn ProgressSink,
    ) -> TrainingResult<AdapterOutput>;
}
