use super::{write_behavior_spec, DEFAULT_CONTEXT_LENGTH};
use crate::error::StageError;
use crate::stage::{PipelineStage, StageContext};
use async_trait::async_trait;
use refinery_abstraction::{ArtifactSpec, KnowledgeRecord};
use refinery_training::naming::base_name;
use refinery_training::{packaging_name, WorkspaceLayout};
use tracing::info;

const SPEC_WRITTEN: f64 = 0.3;
const INGESTED: f64 = 0.6;

/// Behavior spec for a knowledge-augmented artifact.
pub(crate) fn knowledge_artifact_spec(ctx: &StageContext) -> ArtifactSpec {
    let name = packaging_name(&ctx.job.target_name);
    let display_name = base_name(&ctx.job.target_name).to_string();
    let config = &ctx.config;
    let system_prompt = config.role_definition.clone().unwrap_or_else(|| {
        format!(
            "You are {display_name}, an advanced AI assistant with access to a comprehensive knowledge base."
        )
    });

    ArtifactSpec {
        directory: ctx.services.layout.artifact_dir(&name),
        name,
        base: ctx.job.base_model.clone(),
        adapter: None,
        system_prompt,
        parameters: vec![
            (
                "num_ctx".to_string(),
                config.context_length.unwrap_or(DEFAULT_CONTEXT_LENGTH).to_string(),
            ),
            ("temperature".to_string(), config.temperature.unwrap_or(0.8).to_string()),
            ("top_p".to_string(), config.top_p.unwrap_or(0.9).to_string()),
            ("top_k".to_string(), "40".to_string()),
            ("repeat_penalty".to_string(), "1.1".to_string()),
            ("repeat_last_n".to_string(), "64".to_string()),
        ],
    }
}

/// Renders and writes the behavior spec for a knowledge-augmented artifact.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteBehaviorSpec;

#[async_trait]
impl PipelineStage for WriteBehaviorSpec {
    fn name(&self) -> &'static str {
        "WriteBehaviorSpec"
    }

    async fn execute(&self, ctx: &mut StageContext) -> Result<f64, StageError> {
        let spec = knowledge_artifact_spec(ctx);
        write_behavior_spec(&spec).await?;
        info!(job_id = %ctx.job.id, path = %spec.spec_path().display(), "Behavior spec written");
        ctx.artifact_spec = Some(spec);
        Ok(SPEC_WRITTEN)
    }
}

/// Builds the job's retrieval collection from its datasets.
///
/// Skipped, with progress still advancing, when no datasets are configured or
/// none of them yields a usable record.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestKnowledgeBase;

#[async_trait]
impl PipelineStage for IngestKnowledgeBase {
    fn name(&self) -> &'static str {
        "IngestKnowledgeBase"
    }

    async fn execute(&self, ctx: &mut StageContext) -> Result<f64, StageError> {
        let job_id = ctx.job.id;
        if ctx.config.selected_datasets.is_empty() {
            info!(job_id = %job_id, "No datasets configured; skipping knowledge ingestion");
            return Ok(INGESTED);
        }

        let records: Vec<KnowledgeRecord> =
            ctx.datasets().await?.found.iter().flat_map(|d| d.knowledge_records()).collect();
        if records.is_empty() {
            info!(job_id = %job_id, "Datasets produced no knowledge records; skipping ingestion");
            return Ok(INGESTED);
        }

        let collection = WorkspaceLayout::collection_name(job_id);
        let ingested = ctx.services.knowledge.ingest(&collection, &records).await?;
        if !ingested {
            return Err(StageError::Dependency(format!(
                "Knowledge store rejected collection '{collection}'"
            )));
        }

        info!(job_id = %job_id, collection = %collection, records = records.len(), "Knowledge base created");
        Ok(INGESTED)
    }
}
