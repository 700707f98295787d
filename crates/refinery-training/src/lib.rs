//! Refinery Training
//!
//! Backend-agnostic domain for model-customization jobs:
//! - Job, dataset and evaluation records plus their partial updates
//! - Artifact name derivation and workspace layout
//! - Sample normalization and train/validation splitting
//! - The `JobStore`, `AdapterTrainer` and `EvaluationLauncher` seams

pub mod artifacts;
pub mod dataset;
pub mod error;
pub mod evaluation;
pub mod job;
pub mod layout;
pub mod naming;
pub mod progress;
pub mod store;
pub mod trainer;

pub use artifacts::{make_artifact, sha256_file, write_jsonl, ArtifactKind, JobArtifact, JobManifest};
pub use dataset::{convert_datasets, normalize_sample, Dataset, NewDataset, SampleRecord, SampleSplit};
pub use error::{TrainingError, TrainingResult};
pub use evaluation::{
    Evaluation, EvaluationKind, EvaluationLauncher, EvaluationMetrics, EvaluationUpdate, NewEvaluation,
};
pub use job::{
    DatasetId, EvaluationId, HyperParameters, Job, JobConfig, JobId, JobType, JobUpdate, NewJob,
    RunStatus,
};
pub use layout::WorkspaceLayout;
pub use naming::{derive_target_name, latest_alias, packaging_name};
pub use progress::{ChannelProgressSink, ProgressEvent, ProgressSink};
pub use store::{JobStore, MemoryJobStore, StoreError, StoreResult};
pub use trainer::{AdapterOutput, AdapterTrainer, AdapterTrainingRequest, TrainingMetrics};
