//! Registry of in-flight job executions.
//!
//! Every active job has exactly one [`RunningJobHandle`]. The map lives behind a
//! single mutex and is never handed out; callers get copies of handle state.

use chrono::{DateTime, Utc};
use refinery_training::{JobId, RunStatus};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// In-memory bookkeeping for one active job. Never persisted.
#[derive(Debug)]
pub struct RunningJobHandle {
    /// Identifies this execution attempt in logs.
    pub run_id: Uuid,
    /// Cached status; the store remains authoritative.
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    task: Option<JoinHandle<()>>,
}

impl RunningJobHandle {
    #[must_use]
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self { run_id: Uuid::new_v4(), status: RunStatus::Running, started_at, task: None }
    }
}

/// Copy of a handle's state, safe to hold across awaits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleSnapshot {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
}

/// Why [`JobRegistry::try_insert`] refused a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertRejection {
    AlreadyActive,
    Full { active: usize, limit: usize },
}

/// Registry of active jobs.
#[derive(Default)]
pub struct JobRegistry {
    handles: Mutex<HashMap<JobId, RunningJobHandle>>,
}

impl fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRegistry").field("active", &self.len()).finish_non_exhaustive()
    }
}

impl JobRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, RunningJobHandle>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a handle for a job.
    ///
    /// # Returns
    /// `false` if the job already had a handle; the existing one is kept.
    pub fn insert(&self, job_id: JobId, handle: RunningJobHandle) -> bool {
        self.try_insert(job_id, handle, usize::MAX).is_ok()
    }

    /// Registers a handle unless the job is already active or `limit` handles
    /// exist. The check and the insert happen under one lock.
    pub fn try_insert(
        &self,
        job_id: JobId,
        handle: RunningJobHandle,
        limit: usize,
    ) -> Result<(), InsertRejection> {
        let mut handles = self.lock();
        if handles.contains_key(&job_id) {
            warn!(job_id = %job_id, "Job already registered as active");
            return Err(InsertRejection::AlreadyActive);
        }
        if handles.len() >= limit {
            return Err(InsertRejection::Full { active: handles.len(), limit });
        }
        debug!(job_id = %job_id, run_id = %handle.run_id, "Registering running job");
        handles.insert(job_id, handle);
        Ok(())
    }

    /// Attaches the spawned task to the handle of `run_id`.
    ///
    /// If the run already finished and deregistered itself, the task is
    /// simply dropped (detached).
    pub fn attach_task(&self, job_id: JobId, run_id: Uuid, task: JoinHandle<()>) {
        let mut handles = self.lock();
        if let Some(handle) = handles.get_mut(&job_id).filter(|h| h.run_id == run_id) {
            handle.task = Some(task);
        }
    }

    /// Removes the handle for a job regardless of which run owns it.
    pub fn remove(&self, job_id: JobId) -> Option<HandleSnapshot> {
        let handle = self.lock().remove(&job_id)?;
        debug!(job_id = %job_id, run_id = %handle.run_id, "Removed running job");
        Some(snapshot(&handle))
    }

    /// Removes the handle only if it still belongs to `run_id`.
    pub fn remove_run(&self, job_id: JobId, run_id: Uuid) -> bool {
        let mut handles = self.lock();
        if handles.get(&job_id).is_some_and(|h| h.run_id == run_id) {
            handles.remove(&job_id);
            debug!(job_id = %job_id, run_id = %run_id, "Run finished; handle removed");
            true
        } else {
            false
        }
    }

    /// Looks up a job's handle state.
    #[must_use]
    pub fn lookup(&self, job_id: JobId) -> Option<HandleSnapshot> {
        self.lock().get(&job_id).map(snapshot)
    }

    /// Updates the cached status of an active job.
    pub fn set_status(&self, job_id: JobId, status: RunStatus) -> bool {
        self.lock().get_mut(&job_id).map(|h| h.status = status).is_some()
    }

    /// Takes the execution task out of a handle so the caller can await it.
    pub fn take_task(&self, job_id: JobId) -> Option<JoinHandle<()>> {
        self.lock().get_mut(&job_id).and_then(|h| h.task.take())
    }

    #[must_use]
    pub fn contains(&self, job_id: JobId) -> bool {
        self.lock().contains_key(&job_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ids of all active jobs, sorted.
    #[must_use]
    pub fn active_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}

fn snapshot(handle: &RunningJobHandle) -> HandleSnapshot {
    HandleSnapshot { run_id: handle.run_id, status: handle.status, started_at: handle.started_at }
}
