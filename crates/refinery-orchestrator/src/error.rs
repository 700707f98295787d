// Error types for job orchestration

use refinery_abstraction::BackendError;
use refinery_training::{JobId, RunStatus, StoreError, TrainingError};
use thiserror::Error;

/// Result type for orchestration operations
pub type OrchestrationResult<T> = std::result::Result<T, OrchestrationError>;

/// Errors returned by the orchestrator's public operations.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// No job with this id exists in the store
    #[error("Job {0} not found")]
    NotFound(JobId),

    /// The job already has an execution in flight
    #[error("Job {0} is already active")]
    AlreadyActive(JobId),

    /// The job is not in a state that allows starting it
    #[error("Job {job_id} cannot be started from status {status}")]
    NotStartable {
        /// Job id
        job_id: JobId,
        /// Persisted status at the time of the call
        status: RunStatus,
    },

    /// Persistence gateway failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Execution could not be scheduled
    #[error("Scheduling failed: {0}")]
    Scheduling(String),
}

/// Failure of a single pipeline stage.
///
/// The rendered message is what ends up in the job's persisted error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StageError {
    /// The job's configuration cannot be executed
    #[error("{0}")]
    Spec(String),

    /// An external dependency failed; its message is preserved verbatim
    #[error("{0}")]
    Dependency(String),
}

impl From<TrainingError> for StageError {
    fn from(err: TrainingError) -> Self {
        match err {
            TrainingError::InvalidSpec(msg) => Self::Spec(msg),
            other => Self::Dependency(other.to_string()),
        }
    }
}

impl From<BackendError> for StageError {
    fn from(err: BackendError) -> Self {
        Self::Dependency(err.to_string())
    }
}

impl From<StoreError> for StageError {
    fn from(err: StoreError) -> Self {
        Self::Dependency(err.to_string())
    }
}

impl From<std::io::Error> for StageError {
    fn from(err: std::io::Error) -> Self {
        Self::Dependency(err.to_string())
    }
}
