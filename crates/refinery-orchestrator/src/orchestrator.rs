//! Entry point of the engine: start, stop, status, delete and stuck sweeps.

use crate::cleanup::{CleanupCoordinator, CleanupReport};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestrationError, OrchestrationResult};
use crate::evaluation::EvaluationTrigger;
use crate::registry::{InsertRejection, JobRegistry, RunningJobHandle};
use crate::runner::JobRunner;
use crate::services::EngineServices;
use crate::stuck::StuckJobDetector;
use chrono::{DateTime, Utc};
use refinery_training::{Job, JobId, JobUpdate, RunStatus};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Status of a job as seen by callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatusView {
    pub job_id: JobId,
    pub status: RunStatus,
    pub progress: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Whether an execution is in flight in this process.
    pub running: bool,
}

/// Background task running periodic stuck-job sweeps.
#[derive(Debug)]
pub struct SweeperHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Token that stops the sweeper when cancelled.
    #[must_use]
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Stops the sweeper and waits for it to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "Stuck-job sweeper exited abnormally");
        }
    }
}

/// Owns the set of in-flight jobs and dispatches them to concurrent execution.
pub struct JobOrchestrator {
    services: Arc<EngineServices>,
    registry: Arc<JobRegistry>,
    runner: Arc<JobRunner>,
    detector: StuckJobDetector,
    cleanup: CleanupCoordinator,
    config: OrchestratorConfig,
}

impl fmt::Debug for JobOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobOrchestrator")
            .field("config", &self.config)
            .field("active", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl JobOrchestrator {
    /// Creates an orchestrator over the given collaborators.
    #[must_use]
    pub fn new(services: EngineServices, config: OrchestratorConfig) -> Self {
        let services = Arc::new(services);
        let trigger = EvaluationTrigger::new(Arc::clone(&services), config.verify_artifacts);
        let runner = Arc::new(JobRunner::new(Arc::clone(&services), trigger, config.verify_artifacts));
        let detector = StuckJobDetector::new(Arc::clone(&services.store), config.stuck.clone());
        let cleanup = CleanupCoordinator::new(Arc::clone(&services));
        Self { services, registry: Arc::new(JobRegistry::new()), runner, detector, cleanup, config }
    }

    #[must_use]
    pub fn services(&self) -> &EngineServices {
        &self.services
    }

    #[must_use]
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Ids of the jobs executing in this process.
    #[must_use]
    pub fn active_jobs(&self) -> Vec<JobId> {
        self.registry.active_ids()
    }

    /// Whether another job can be started without exceeding the limit.
    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.registry.len() < self.config.max_concurrent_jobs
    }

    async fn load(&self, job_id: JobId) -> OrchestrationResult<Job> {
        self.services.store.get_job(job_id).await?.ok_or(OrchestrationError::NotFound(job_id))
    }

    /// Starts executing a pending job in the background.
    ///
    /// # Returns
    /// `Ok(true)` once the execution is spawned. `Ok(false)` if scheduling
    /// failed before execution began; the job is then persisted as `FAILED`
    /// with the cause.
    ///
    /// # Errors
    /// `NotFound`, `AlreadyActive`, or `NotStartable` when the job is not `PENDING`.
    pub async fn start(&self, job_id: JobId) -> OrchestrationResult<bool> {
        let mut job = self.load(job_id).await?;
        if self.registry.contains(job_id) {
            return Err(OrchestrationError::AlreadyActive(job_id));
        }
        if job.status != RunStatus::Pending {
            return Err(OrchestrationError::NotStartable { job_id, status: job.status });
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                let cause = OrchestrationError::Scheduling(format!("no async runtime available: {e}"));
                return self.fail_to_schedule(job_id, &cause).await;
            }
        };
        let started_at = Utc::now();
        let handle = RunningJobHandle::new(started_at);
        let run_id = handle.run_id;
        match self.registry.try_insert(job_id, handle, self.config.max_concurrent_jobs) {
            Ok(()) => {}
            Err(InsertRejection::AlreadyActive) => {
                return Err(OrchestrationError::AlreadyActive(job_id));
            }
            Err(InsertRejection::Full { active, limit }) => {
                let cause = OrchestrationError::Scheduling(format!(
                    "{active} jobs already running (limit {limit})"
                ));
                return self.fail_to_schedule(job_id, &cause).await;
            }
        }

        let update = JobUpdate::new()
            .status(RunStatus::Running)
            .started_at(started_at)
            .progress(0.0)
            .when_status(RunStatus::Pending);
        match self.services.store.update_job(job_id, &update).await {
            Ok(true) => {}
            Ok(false) => {
                self.registry.remove_run(job_id, run_id);
                let status = self.load(job_id).await?.status;
                return Err(OrchestrationError::NotStartable { job_id, status });
            }
            Err(e) => {
                self.registry.remove_run(job_id, run_id);
                return Err(e.into());
            }
        }
        job.status = RunStatus::Running;
        job.started_at = Some(started_at);
        job.progress = 0.0;

        let runner = Arc::clone(&self.runner);
        let registry = Arc::clone(&self.registry);
        let task = runtime.spawn(async move {
            let _guard = RunGuard { registry, job_id, run_id };
            let outcome = runner.run(job).await;
            debug!(job_id = %job_id, run_id = %run_id, outcome = ?outcome, "Job execution ended");
        });
        self.registry.attach_task(job_id, run_id, task);

        info!(job_id = %job_id, run_id = %run_id, "Job started");
        Ok(true)
    }

    async fn fail_to_schedule(
        &self,
        job_id: JobId,
        cause: &OrchestrationError,
    ) -> OrchestrationResult<bool> {
        error!(job_id = %job_id, error = %cause, "Job could not be scheduled");
        let update = JobUpdate::new()
            .status(RunStatus::Failed)
            .error_message(cause.to_string())
            .completed_at(Utc::now())
            .when_status(RunStatus::Pending);
        self.services.store.update_job(job_id, &update).await?;
        Ok(false)
    }

    /// Stops an active job.
    ///
    /// The execution notices `STOPPED` at its next stage boundary and exits
    /// without further writes.
    ///
    /// # Returns
    /// `false` if the job is not active in this process.
    pub async fn stop(&self, job_id: JobId) -> OrchestrationResult<bool> {
        if !self.registry.contains(job_id) {
            return Ok(false);
        }

        let update = JobUpdate::new()
            .status(RunStatus::Stopped)
            .completed_at(Utc::now())
            .when_status(RunStatus::Running);
        let stopped = self.services.store.update_job(job_id, &update).await?;
        self.registry.remove(job_id);

        if stopped {
            info!(job_id = %job_id, "Job stopped");
        } else {
            warn!(job_id = %job_id, "Job was active but no longer RUNNING; handle removed");
        }
        Ok(stopped)
    }

    /// Current status of a job: the live handle when active, else the record.
    pub async fn status(&self, job_id: JobId) -> OrchestrationResult<Option<JobStatusView>> {
        let record = self.services.store.get_job(job_id).await?;
        if let Some(handle) = self.registry.lookup(job_id) {
            return Ok(Some(JobStatusView {
                job_id,
                status: handle.status,
                progress: record.as_ref().map(|job| job.progress),
                started_at: Some(handle.started_at),
                completed_at: None,
                running: true,
            }));
        }

        Ok(record.map(|job| JobStatusView {
            job_id,
            status: job.status,
            progress: Some(job.progress),
            started_at: job.started_at,
            completed_at: job.completed_at,
            running: false,
        }))
    }

    /// Deletes a job and everything it produced, stopping it first if active.
    pub async fn delete(&self, job_id: JobId) -> OrchestrationResult<CleanupReport> {
        self.load(job_id).await?;
        if self.registry.contains(job_id) {
            self.stop(job_id).await?;
        }
        let job = self.load(job_id).await?;
        let report = self.cleanup.cleanup(&job).await;
        info!(job_id = %job_id, success = report.success(), "Job deleted");
        Ok(report)
    }

    /// Force-fails jobs that have been running too long without progress.
    pub async fn sweep_stuck_jobs(&self) -> OrchestrationResult<Vec<JobId>> {
        let failed = self.detector.sweep(Utc::now()).await?;
        for job_id in &failed {
            self.registry.set_status(*job_id, RunStatus::Failed);
        }
        Ok(failed)
    }

    /// Runs [`Self::sweep_stuck_jobs`] every `interval` until cancelled.
    pub fn spawn_stuck_sweeper(self: &Arc<Self>, interval: Duration) -> SweeperHandle {
        let token = CancellationToken::new();
        let orchestrator = Arc::clone(self);
        let child = token.clone();

        let task = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Stuck-job sweeper started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = child.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = orchestrator.sweep_stuck_jobs().await {
                            warn!(error = %e, "Stuck-job sweep failed");
                        }
                    }
                }
            }
            info!("Stuck-job sweeper stopped");
        });

        SweeperHandle { token, task }
    }

    /// Waits for the in-flight execution of a job to finish.
    ///
    /// # Returns
    /// `false` if there was no execution to wait for.
    pub async fn wait(&self, job_id: JobId) -> bool {
        let Some(task) = self.registry.take_task(job_id) else {
            return false;
        };
        if let Err(e) = task.await {
            error!(job_id = %job_id, error = %e, "Job execution panicked");
        }
        true
    }
}

/// Deregisters a run on every exit path, including panics.
struct RunGuard {
    registry: Arc<JobRegistry>,
    job_id: JobId,
    run_id: uuid::Uuid,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.registry.remove_run(self.job_id, self.run_id);
    }
}
