use super::knowledge::knowledge_artifact_spec;
use super::{write_behavior_spec, DEFAULT_CONTEXT_LENGTH};
use crate::error::StageError;
use crate::stage::{PipelineStage, StageContext};
use async_trait::async_trait;
use refinery_abstraction::ArtifactSpec;
use refinery_training::naming::base_name;
use refinery_training::{make_artifact, packaging_name, ArtifactKind, JobManifest, JobType};
use tracing::{info, warn};

const FINALIZED: f64 = 1.0;

fn adapter_artifact_spec(ctx: &StageContext) -> Result<ArtifactSpec, StageError> {
    let adapter = ctx.adapter.as_ref().ok_or_else(|| {
        StageError::Dependency("No adapter output available to package".to_string())
    })?;
    let name = packaging_name(&ctx.job.target_name);
    let display_name = base_name(&ctx.job.target_name).to_string();
    let config = &ctx.config;

    Ok(ArtifactSpec {
        directory: ctx.services.layout.artifact_dir(&name),
        name,
        base: ctx.job.base_model.clone(),
        adapter: Some(adapter.adapter_dir.clone()),
        system_prompt: config
            .role_definition
            .clone()
            .unwrap_or_else(|| format!("You are {display_name}, fine-tuned using LoRA.")),
        parameters: vec![
            (
                "num_ctx".to_string(),
                config.context_length.unwrap_or(DEFAULT_CONTEXT_LENGTH).to_string(),
            ),
            ("temperature".to_string(), config.temperature.unwrap_or(0.7).to_string()),
            ("top_p".to_string(), config.top_p.unwrap_or(0.9).to_string()),
        ],
    })
}

/// Materializes the deployable artifact through the model backend.
#[derive(Debug, Clone, Copy)]
pub struct PackageArtifact {
    progress: f64,
}

impl PackageArtifact {
    #[must_use]
    pub const fn new(progress: f64) -> Self {
        Self { progress }
    }
}

#[async_trait]
impl PipelineStage for PackageArtifact {
    fn name(&self) -> &'static str {
        "PackageArtifact"
    }

    async fn execute(&self, ctx: &mut StageContext) -> Result<f64, StageError> {
        let spec = match ctx.artifact_spec.take() {
            Some(spec) => spec,
            None => match ctx.job.job_type {
                JobType::AdapterTuning => adapter_artifact_spec(ctx)?,
                JobType::KnowledgeAugmentation => knowledge_artifact_spec(ctx),
            },
        };
        write_behavior_spec(&spec).await?;

        let backend = &ctx.services.backend;
        info!(job_id = %ctx.job.id, backend = backend.id(), name = %spec.name, "Packaging artifact");
        let built = backend.build(&spec).await?;
        if built != spec.name {
            info!(job_id = %ctx.job.id, requested = %spec.name, built = %built, "Backend renamed artifact");
        }

        ctx.packaged_name = Some(built);
        ctx.artifact_spec = Some(spec);
        Ok(self.progress)
    }
}

/// Confirms the packaged artifact and records the job manifest.
#[derive(Debug, Clone, Copy, Default)]
pub struct Finalize;

#[async_trait]
impl PipelineStage for Finalize {
    fn name(&self) -> &'static str {
        "Finalize"
    }

    async fn execute(&self, ctx: &mut StageContext) -> Result<f64, StageError> {
        let job_id = ctx.job.id;
        let name = ctx
            .packaged_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| StageError::Dependency("No artifact was packaged".to_string()))?;

        if ctx.verify_artifacts {
            match ctx.services.backend.exists(&name).await {
                Ok(true) => {}
                Ok(false) => {
                    return Err(StageError::Dependency(format!(
                        "Artifact '{name}' not found after packaging"
                    )));
                }
                Err(e) => {
                    warn!(job_id = %job_id, artifact = %name, error = %e, "Could not verify artifact");
                }
            }
        }

        let layout = &ctx.services.layout;
        let mut candidates = vec![
            (ArtifactKind::TrainSplit, layout.train_path(job_id)),
            (ArtifactKind::ValidationSplit, layout.val_path(job_id)),
        ];
        if let Some(adapter) = &ctx.adapter {
            candidates.push((ArtifactKind::Adapter, adapter.adapter_dir.clone()));
        }
        if let Some(spec) = &ctx.artifact_spec {
            candidates.push((ArtifactKind::BehaviorSpec, spec.spec_path()));
        }
        let artifacts = candidates
            .into_iter()
            .filter(|(_, path)| path.exists())
            .map(|(kind, path)| make_artifact(kind, path))
            .collect::<Result<Vec<_>, _>>()?;

        let manifest = JobManifest {
            job_id,
            job_type: ctx.job.job_type,
            created_at: chrono::Utc::now(),
            base_model: ctx.job.base_model.clone(),
            resolved_artifact: name.clone(),
            datasets: ctx.config.selected_datasets.clone(),
            artifacts,
        };
        manifest.write(&layout.manifest_path(job_id))?;

        info!(job_id = %job_id, artifact = %name, "Artifact resolved");
        ctx.resolved_artifact = Some(name);
        Ok(FINALIZED)
    }
}
