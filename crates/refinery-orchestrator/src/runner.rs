//! Executes one job's pipeline from start to terminal state.

use crate::error::StageError;
use crate::evaluation::EvaluationTrigger;
use crate::services::EngineServices;
use crate::stage::{pipeline_for, StageContext};
use chrono::Utc;
use refinery_training::{Job, JobId, JobUpdate, RunStatus};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// How a job execution ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// Every stage succeeded and the job was marked `COMPLETED`.
    Completed { artifact: String },
    /// A stage failed and the job was marked `FAILED`.
    Failed { message: String },
    /// The persisted status left `RUNNING` underneath the execution
    /// (stopped, or failed by the stuck-job sweep).
    Interrupted { status: Option<RunStatus> },
}

/// Runs the ordered stages for a job's type.
pub struct JobRunner {
    services: Arc<EngineServices>,
    trigger: EvaluationTrigger,
    verify_artifacts: bool,
}

impl std::fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRunner")
            .field("verify_artifacts", &self.verify_artifacts)
            .finish_non_exhaustive()
    }
}

impl JobRunner {
    #[must_use]
    pub fn new(services: Arc<EngineServices>, trigger: EvaluationTrigger, verify_artifacts: bool) -> Self {
        Self { services, trigger, verify_artifacts }
    }

    /// Executes `job`, which must already be persisted as `RUNNING`.
    pub async fn run(&self, job: Job) -> RunOutcome {
        let job_id = job.id;
        let config = match job.job_config() {
            Ok(config) => config,
            Err(e) => return self.fail(job_id, &StageError::from(e).to_string()).await,
        };

        info!(job_id = %job_id, job_type = %job.job_type, "Job execution started");
        let mut ctx = StageContext::new(job, config, Arc::clone(&self.services), self.verify_artifacts);

        for stage in pipeline_for(ctx.job.job_type) {
            if let Some(status) = self.interrupted(job_id).await {
                info!(job_id = %job_id, stage = stage.name(), status = ?status, "Job no longer running; exiting");
                return RunOutcome::Interrupted { status };
            }

            debug!(job_id = %job_id, stage = stage.name(), "Stage started");
            match stage.execute(&mut ctx).await {
                Ok(progress) => {
                    ctx.reporter.report(progress).await;
                    debug!(job_id = %job_id, stage = stage.name(), progress, "Stage finished");
                }
                Err(e) => {
                    let message = format!("{} failed: {e}", stage.name());
                    return self.fail(job_id, &message).await;
                }
            }
        }

        let Some(artifact) = ctx.resolved_artifact.clone() else {
            return self.fail(job_id, "Pipeline finished without resolving an artifact").await;
        };

        let update = JobUpdate::new()
            .status(RunStatus::Completed)
            .progress(1.0)
            .completed_at(Utc::now())
            .resolved_artifact(&artifact)
            .when_status(RunStatus::Running);
        match self.services.store.update_job(job_id, &update).await {
            Ok(true) => {}
            Ok(false) => {
                info!(job_id = %job_id, "Completion superseded; job no longer running");
                return RunOutcome::Interrupted { status: self.current_status(job_id).await };
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to persist job completion");
                return RunOutcome::Failed { message: e.to_string() };
            }
        }
        info!(job_id = %job_id, artifact = %artifact, "Job completed");

        let mut completed = ctx.job;
        completed.status = RunStatus::Completed;
        completed.progress = 1.0;
        completed.resolved_artifact = Some(artifact.clone());
        self.trigger.on_completed(&completed).await;

        RunOutcome::Completed { artifact }
    }

    /// Re-reads the persisted status at a stage boundary.
    ///
    /// # Returns
    /// `Some(status)` when execution must stop (the job is gone or no longer `RUNNING`).
    async fn interrupted(&self, job_id: JobId) -> Option<Option<RunStatus>> {
        match self.services.store.get_job(job_id).await {
            Ok(Some(job)) if job.status == RunStatus::Running => None,
            Ok(Some(job)) => Some(Some(job.status)),
            Ok(None) => Some(None),
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Status checkpoint failed; continuing");
                None
            }
        }
    }

    async fn current_status(&self, job_id: JobId) -> Option<RunStatus> {
        self.services.store.get_job(job_id).await.ok().flatten().map(|job| job.status)
    }

    async fn fail(&self, job_id: JobId, message: &str) -> RunOutcome {
        error!(job_id = %job_id, error = %message, "Job failed");
        let update = JobUpdate::new()
            .status(RunStatus::Failed)
            .error_message(message)
            .completed_at(Utc::now())
            .when_status(RunStatus::Running);
        match self.services.store.update_job(job_id, &update).await {
            Ok(true) => RunOutcome::Failed { message: message.to_string() },
            Ok(false) => {
                info!(job_id = %job_id, "Failure superseded; job no longer running");
                RunOutcome::Interrupted { status: self.current_status(job_id).await }
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to persist job failure");
                RunOutcome::Failed { message: message.to_string() }
            }
        }
    }
}
