use async_trait::async_trait;
use refinery_training::{
    AdapterOutput, AdapterTrainer, AdapterTrainingRequest, ProgressSink, TrainingError,
    TrainingResult,
};

/// Placeholder used when no `[trainer]` command is configured. Adapter-tuning
/// jobs fail with an actionable message; knowledge jobs are unaffected.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredTrainer;

#[async_trait]
impl AdapterTrainer for UnconfiguredTrainer {
    fn id(&self) -> &'static str {
        "unconfigured"
    }

    async fn train(
        &self,
        _request: &AdapterTrainingRequest,
        _progress: &dyn ProgressSink,
    ) -> TrainingResult<AdapterOutput> {
        Err(TrainingError::Trainer(
            "No adapter trainer configured; set [trainer].command in refinery.toml".to_string(),
        ))
    }
}
