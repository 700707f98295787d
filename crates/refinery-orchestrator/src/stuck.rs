//! Detection and remediation of hung jobs.

use crate::config::StuckJobPolicy;
use crate::error::OrchestrationResult;
use chrono::{DateTime, Utc};
use refinery_training::{Job, JobId, JobStore, JobType, JobUpdate, RunStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

impl StuckJobPolicy {
    #[must_use]
    pub const fn timeout_for(&self, job_type: JobType) -> Duration {
        match job_type {
            JobType::AdapterTuning => self.adapter_timeout,
            JobType::KnowledgeAugmentation => self.knowledge_timeout,
        }
    }

    /// A job is stuck when it is `RUNNING`, has started, has run past its
    /// type's timeout, and is still below the progress threshold.
    #[must_use]
    pub fn is_stuck(&self, job: &Job, now: DateTime<Utc>) -> bool {
        if job.status != RunStatus::Running || job.progress >= self.progress_threshold {
            return false;
        }
        let Some(elapsed) = job.elapsed_since_start(now).and_then(|d| d.to_std().ok()) else {
            return false;
        };
        elapsed > self.timeout_for(job.job_type)
    }
}

/// Error message recorded on a force-failed job.
#[must_use]
pub fn stuck_message(minutes: i64, progress: f64) -> String {
    format!("Training stuck for {minutes} minutes with {:.1}% progress", progress * 100.0)
}

/// Sweeps running jobs and force-fails the ones that hung.
///
/// Only persisted state is touched; a live execution notices the `FAILED`
/// status at its next stage boundary.
pub struct StuckJobDetector {
    store: Arc<dyn JobStore>,
    policy: StuckJobPolicy,
}

impl std::fmt::Debug for StuckJobDetector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StuckJobDetector").field("policy", &self.policy).finish_non_exhaustive()
    }
}

impl StuckJobDetector {
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>, policy: StuckJobPolicy) -> Self {
        Self { store, policy }
    }

    #[must_use]
    pub fn policy(&self) -> &StuckJobPolicy {
        &self.policy
    }

    /// Marks every stuck job `FAILED`.
    ///
    /// # Returns
    /// Ids of the jobs that were failed by this sweep.
    pub async fn sweep(&self, now: DateTime<Utc>) -> OrchestrationResult<Vec<JobId>> {
        let running = self.store.list_jobs_with_status(RunStatus::Running).await?;
        debug!(running = running.len(), "Sweeping for stuck jobs");

        let mut failed = Vec::new();
        for job in running.iter().filter(|job| self.policy.is_stuck(job, now)) {
            let minutes = job.elapsed_since_start(now).map_or(0, |d| d.num_minutes());
            let message = stuck_message(minutes, job.progress);
            let update = JobUpdate::new()
                .status(RunStatus::Failed)
                .error_message(&message)
                .completed_at(now)
                .when_status(RunStatus::Running);

            match self.store.update_job(job.id, &update).await {
                Ok(true) => {
                    warn!(job_id = %job.id, minutes, progress = job.progress, "Job marked as stuck");
                    failed.push(job.id);
                }
                Ok(false) => debug!(job_id = %job.id, "Job left RUNNING before it could be failed"),
                Err(e) => warn!(job_id = %job.id, error = %e, "Failed to mark stuck job"),
            }
        }

        if !failed.is_empty() {
            info!(count = failed.len(), "Stuck jobs failed");
        }
        Ok(failed)
    }
}
