//! Job orchestration engine for Refinery.
//!
//! Runs model-customization jobs through type-specific pipelines on the tokio
//! runtime, persisting progress and state transitions through a [`JobStore`].
//!
//! # Main types
//!
//! - [`JobOrchestrator`]: start, stop, status, delete and stuck-job sweeps
//! - [`JobRunner`]: executes one job's ordered stages
//! - [`PipelineStage`]: one unit of pipeline work
//! - [`StuckJobDetector`]: force-fails hung jobs
//! - [`CleanupCoordinator`]: cascading resource removal on deletion
//! - [`EvaluationTrigger`]: chains an evaluation after completion
//!
//! [`JobStore`]: refinery_training::JobStore

pub mod cleanup;
pub mod config;
pub mod error;
pub mod evaluation;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod runner;
pub mod services;
pub mod stage;
pub mod stages;
pub mod stuck;

pub use cleanup::{CleanupCoordinator, CleanupOutcome, CleanupReport, CleanupResource, CleanupStatus};
pub use config::{OrchestratorConfig, StuckJobPolicy};
pub use error::{OrchestrationError, OrchestrationResult, StageError};
pub use evaluation::EvaluationTrigger;
pub use orchestrator::{JobOrchestrator, JobStatusView, SweeperHandle};
pub use progress::ProgressReporter;
pub use registry::{HandleSnapshot, InsertRejection, JobRegistry, RunningJobHandle};
pub use runner::{JobRunner, RunOutcome};
pub use services::EngineServices;
pub use stage::{pipeline_for, PipelineStage, SelectedDatasets, StageContext};
pub use stuck::{stuck_message, StuckJobDetector};
