use crate::error::StageError;
use crate::stage::{PipelineStage, StageContext};
use async_trait::async_trait;
use refinery_training::{
    convert_datasets, write_jsonl, AdapterTrainingRequest, ChannelProgressSink, ProgressEvent,
};
use tracing::{debug, info};

const PREPARED: f64 = 0.2;
const TRAINED: f64 = 0.8;

/// Converts the configured datasets into train/validation JSONL files.
#[derive(Debug, Clone, Copy, Default)]
pub struct PrepareTrainingData;

#[async_trait]
impl PipelineStage for PrepareTrainingData {
    fn name(&self) -> &'static str {
        "PrepareTrainingData"
    }

    async fn execute(&self, ctx: &mut StageContext) -> Result<f64, StageError> {
        if ctx.config.selected_datasets.is_empty() {
            return Err(StageError::Spec("No datasets selected for LoRA training".to_string()));
        }

        let job_id = ctx.job.id;
        let selected = ctx.datasets().await?;
        let split = convert_datasets(&selected.found, &selected.missing)?;

        let layout = &ctx.services.layout;
        layout.ensure_job_dirs(job_id)?;
        write_jsonl(&layout.train_path(job_id), &split.train)?;
        write_jsonl(&layout.val_path(job_id), &split.val)?;

        info!(
            job_id = %job_id,
            train = split.train.len(),
            val = split.val.len(),
            "Training data prepared"
        );
        Ok(PREPARED)
    }
}

/// Runs the adapter trainer, streaming its progress into the job record.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunAdapterTraining;

#[async_trait]
impl PipelineStage for RunAdapterTraining {
    fn name(&self) -> &'static str {
        "RunAdapterTraining"
    }

    async fn execute(&self, ctx: &mut StageContext) -> Result<f64, StageError> {
        let job_id = ctx.job.id;
        let layout = &ctx.services.layout;
        let request = AdapterTrainingRequest {
            job_id,
            base_model: ctx.job.base_model.clone(),
            target_name: ctx.job.target_name.clone(),
            train_path: layout.train_path(job_id),
            val_path: layout.val_path(job_id),
            output_dir: layout.adapter_dir(job_id),
            hyperparameters: ctx.config.hyperparameters.clone(),
        };

        let trainer = std::sync::Arc::clone(&ctx.services.trainer);
        info!(job_id = %job_id, trainer = trainer.id(), "Starting adapter training");

        let (sink, mut events) = ChannelProgressSink::new();
        let training = trainer.train(&request, &sink);
        tokio::pin!(training);

        let output = loop {
            tokio::select! {
                result = &mut training => break result?,
                Some(event) = events.recv() => forward(ctx, event).await,
            }
        };
        while let Ok(event) = events.try_recv() {
            forward(ctx, event).await;
        }

        info!(
            job_id = %job_id,
            adapter = %output.adapter_dir.display(),
            final_loss = ?output.metrics.final_loss,
            "Adapter training finished"
        );
        ctx.adapter = Some(output);
        Ok(TRAINED)
    }
}

async fn forward(ctx: &mut StageContext, event: ProgressEvent) {
    match event {
        ProgressEvent::Fraction { value, .. } => {
            ctx.reporter.report_within(PREPARED, TRAINED, value).await;
        }
        ProgressEvent::Message { job_id, message } => debug!(job_id = %job_id, "{message}"),
        ProgressEvent::Started { .. } | ProgressEvent::Finished { .. } => {}
    }
}
