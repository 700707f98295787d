//! Post-completion hook that chains a before/after evaluation.

use crate::services::EngineServices;
use chrono::Utc;
use refinery_training::{
    latest_alias, EvaluationId, EvaluationKind, EvaluationUpdate, Job, NewEvaluation, RunStatus,
};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Creates and launches an evaluation once a job completes.
///
/// Every failure here is logged; none of them touches the job record.
pub struct EvaluationTrigger {
    services: Arc<EngineServices>,
    verify_artifact: bool,
}

impl std::fmt::Debug for EvaluationTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationTrigger")
            .field("verify_artifact", &self.verify_artifact)
            .finish_non_exhaustive()
    }
}

impl EvaluationTrigger {
    #[must_use]
    pub fn new(services: Arc<EngineServices>, verify_artifact: bool) -> Self {
        Self { services, verify_artifact }
    }

    /// Resolves the name evaluations should query.
    ///
    /// Prefers the resolved artifact, else the target name under `:latest`.
    /// With verification on, a resolved name the backend does not know falls
    /// back to the `:latest` alias.
    pub async fn queryable_name(&self, job: &Job) -> String {
        let fallback = latest_alias(&job.target_name);
        let Some(resolved) = job.resolved_artifact.clone().filter(|n| !n.trim().is_empty()) else {
            return fallback;
        };
        if !self.verify_artifact || resolved == fallback {
            return resolved;
        }

        match self.services.backend.exists(&resolved).await {
            Ok(true) => resolved,
            Ok(false) => {
                warn!(job_id = %job.id, artifact = %resolved, fallback = %fallback, "Resolved artifact not found; using alias");
                fallback
            }
            Err(e) => {
                warn!(job_id = %job.id, artifact = %resolved, error = %e, "Could not verify artifact");
                resolved
            }
        }
    }

    /// Creates and launches the evaluation for a completed job.
    ///
    /// # Returns
    /// The id of the persisted evaluation, or `None` if none was created.
    pub async fn on_completed(&self, job: &Job) -> Option<EvaluationId> {
        let dataset_id = match job.job_config() {
            Ok(config) => config.selected_datasets.first().copied(),
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Unreadable job config; skipping evaluation");
                return None;
            }
        };
        let Some(dataset_id) = dataset_id else {
            info!(job_id = %job.id, "No dataset configured; skipping evaluation");
            return None;
        };

        let model_name = self.queryable_name(job).await;
        let request = NewEvaluation {
            job_id: Some(job.id),
            notes: Some(format!("Training evaluation: {} -> {model_name}", job.base_model)),
            model_name,
            base_model: job.base_model.clone(),
            dataset_id: Some(dataset_id),
            kind: EvaluationKind::Accuracy,
        };

        let store = &self.services.store;
        let evaluation = match store.create_evaluation(request).await {
            Ok(evaluation) => evaluation,
            Err(e) => {
                error!(job_id = %job.id, error = %e, "Failed to create evaluation");
                return None;
            }
        };
        info!(job_id = %job.id, evaluation_id = %evaluation.id, model = %evaluation.model_name, "Evaluation created");

        if let Err(e) = self.services.evaluations.launch(&evaluation).await {
            error!(job_id = %job.id, evaluation_id = %evaluation.id, error = %e, "Failed to launch evaluation");
            let update = EvaluationUpdate::new()
                .status(RunStatus::Failed)
                .error_message(e.to_string())
                .completed_at(Utc::now());
            if let Err(e) = store.update_evaluation(evaluation.id, &update).await {
                warn!(evaluation_id = %evaluation.id, error = %e, "Failed to record launch failure");
            }
        }

        Some(evaluation.id)
    }
}
