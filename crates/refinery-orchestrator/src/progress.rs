//! Persisted, monotonic job progress.

use refinery_training::{JobId, JobStore, JobUpdate, RunStatus};
use std::sync::Arc;
use tracing::{debug, warn};

/// Writes a running job's progress to the store.
///
/// Values never go backwards: a report at or below the last persisted value is
/// skipped. Writes are guarded on `RUNNING`, so a stopped or failed job is
/// never touched.
pub struct ProgressReporter {
    store: Arc<dyn JobStore>,
    job_id: JobId,
    current: f64,
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("job_id", &self.job_id)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl ProgressReporter {
    #[must_use]
    pub fn new(store: Arc<dyn JobStore>, job_id: JobId, current: f64) -> Self {
        Self { store, job_id, current }
    }

    #[must_use]
    pub fn current(&self) -> f64 {
        self.current
    }

    /// Persists `value` if it advances progress.
    ///
    /// # Returns
    /// `true` if a write was accepted by the store.
    pub async fn report(&mut self, value: f64) -> bool {
        let value = value.clamp(0.0, 1.0);
        if value <= self.current {
            return false;
        }

        let update = JobUpdate::new().progress(value).when_status(RunStatus::Running);
        match self.store.update_job(self.job_id, &update).await {
            Ok(true) => {
                debug!(job_id = %self.job_id, progress = value, "Progress updated");
                self.current = value;
                true
            }
            Ok(false) => {
                debug!(job_id = %self.job_id, progress = value, "Progress write superseded; job no longer running");
                false
            }
            Err(e) => {
                warn!(job_id = %self.job_id, error = %e, "Failed to persist progress");
                false
            }
        }
    }

    /// Maps a fraction of a stage into the `[from, to]` window and reports it.
    pub async fn report_within(&mut self, from: f64, to: f64, fraction: f64) -> bool {
        let fraction = fraction.clamp(0.0, 1.0);
        self.report((to - from).mul_add(fraction, from)).await
    }
}
