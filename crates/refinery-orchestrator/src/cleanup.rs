//! Cascading removal of everything a job produced.

use crate::services::EngineServices;
use refinery_training::{packaging_name, Job, JobId, JobType, RunStatus, WorkspaceLayout};
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupResource {
    KnowledgeCollection,
    BackendArtifact,
    ArtifactDirectory,
    AdapterDirectory,
    WorkingDirectory,
    JobRecord,
}

impl CleanupResource {
    const fn label(self) -> &'static str {
        match self {
            Self::KnowledgeCollection => "Knowledge collection",
            Self::BackendArtifact => "Model artifact",
            Self::ArtifactDirectory => "Artifact directory",
            Self::AdapterDirectory => "Adapter directory",
            Self::WorkingDirectory => "Working directory",
            Self::JobRecord => "Job record",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "snake_case")]
pub enum CleanupStatus {
    Deleted,
    NotFound,
    Error(String),
}

/// Result of removing one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupOutcome {
    pub resource: CleanupResource,
    pub target: String,
    pub status: CleanupStatus,
}

impl CleanupOutcome {
    fn new(resource: CleanupResource, target: impl Into<String>, status: CleanupStatus) -> Self {
        Self { resource, target: target.into(), status }
    }

    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self.status, CleanupStatus::Error(_))
    }
}

impl fmt::Display for CleanupOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = self.resource.label();
        match &self.status {
            CleanupStatus::Deleted => write!(f, "{label} '{}': deleted", self.target),
            CleanupStatus::NotFound => write!(f, "{label} '{}': not found", self.target),
            CleanupStatus::Error(e) => write!(f, "{label} '{}' cleanup error: {e}", self.target),
        }
    }
}

/// Everything a deletion did, step by step.
#[derive(Debug, Clone, Serialize)]
pub struct CleanupReport {
    pub job_id: JobId,
    pub job_name: String,
    pub outcomes: Vec<CleanupOutcome>,
    /// Whether the job record itself was removed.
    pub record_deleted: bool,
}

impl CleanupReport {
    /// The deletion succeeded when the job record is gone, even if some side
    /// resources reported errors.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.record_deleted
    }

    #[must_use]
    pub fn outcome(&self, resource: CleanupResource) -> Option<&CleanupOutcome> {
        self.outcomes.iter().find(|o| o.resource == resource)
    }

    #[must_use]
    pub fn errors(&self) -> Vec<&CleanupOutcome> {
        self.outcomes.iter().filter(|o| o.is_error()).collect()
    }
}

/// Removes a job's collection, artifact, directories and record.
///
/// Each step records an outcome; no step prevents the ones after it. The
/// record is deleted last.
pub struct CleanupCoordinator {
    services: Arc<EngineServices>,
}

impl fmt::Debug for CleanupCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanupCoordinator").finish_non_exhaustive()
    }
}

impl CleanupCoordinator {
    #[must_use]
    pub fn new(services: Arc<EngineServices>) -> Self {
        Self { services }
    }

    pub async fn cleanup(&self, job: &Job) -> CleanupReport {
        let mut outcomes = Vec::new();
        let layout = &self.services.layout;

        if job.job_type == JobType::KnowledgeAugmentation {
            let collection = WorkspaceLayout::collection_name(job.id);
            let status = match self.services.knowledge.delete(&collection).await {
                Ok(true) => CleanupStatus::Deleted,
                Ok(false) => CleanupStatus::NotFound,
                Err(e) => CleanupStatus::Error(e.to_string()),
            };
            outcomes.push(CleanupOutcome::new(CleanupResource::KnowledgeCollection, collection, status));
        }

        // Packaging writes under the requested name; the backend may resolve another.
        let resolved = job
            .resolved_artifact
            .as_deref()
            .filter(|n| !n.is_empty() && job.status == RunStatus::Completed);
        let requested_dir = layout.artifact_dir(&packaging_name(&job.target_name));
        let mut artifact_dirs = vec![requested_dir];
        if let Some(artifact) = resolved {
            let dir = layout.artifact_dir(artifact);
            if !artifact_dirs.contains(&dir) {
                artifact_dirs.push(dir);
            }
        }
        for dir in artifact_dirs {
            outcomes.push(CleanupOutcome::new(
                CleanupResource::ArtifactDirectory,
                dir.display().to_string(),
                remove_dir(&dir).await,
            ));
        }

        if let Some(artifact) = resolved {
            let status = match self.services.backend.remove(artifact).await {
                Ok(true) => CleanupStatus::Deleted,
                Ok(false) => CleanupStatus::NotFound,
                Err(e) => CleanupStatus::Error(e.to_string()),
            };
            outcomes.push(CleanupOutcome::new(CleanupResource::BackendArtifact, artifact, status));
        }

        if job.job_type == JobType::AdapterTuning {
            let adapter = layout.adapter_dir(job.id);
            outcomes.push(CleanupOutcome::new(
                CleanupResource::AdapterDirectory,
                adapter.display().to_string(),
                remove_dir(&adapter).await,
            ));
        }

        let working = layout.training_data_dir(job.id);
        outcomes.push(CleanupOutcome::new(
            CleanupResource::WorkingDirectory,
            working.display().to_string(),
            remove_dir(&working).await,
        ));

        let record_status = match self.services.store.delete_job(job.id).await {
            Ok(true) => CleanupStatus::Deleted,
            Ok(false) => CleanupStatus::NotFound,
            Err(e) => CleanupStatus::Error(e.to_string()),
        };
        let record_deleted = record_status == CleanupStatus::Deleted;
        outcomes.push(CleanupOutcome::new(CleanupResource::JobRecord, job.id.to_string(), record_status));

        for outcome in &outcomes {
            if outcome.is_error() {
                warn!(job_id = %job.id, "{outcome}");
            } else {
                info!(job_id = %job.id, "{outcome}");
            }
        }

        CleanupReport { job_id: job.id, job_name: job.name.clone(), outcomes, record_deleted }
    }
}

async fn remove_dir(path: &Path) -> CleanupStatus {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => CleanupStatus::Deleted,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => CleanupStatus::NotFound,
        Err(e) => CleanupStatus::Error(e.to_string()),
    }
}
