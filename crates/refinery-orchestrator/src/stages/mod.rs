//! Concrete pipeline stages.

mod adapter;
mod knowledge;
mod packaging;

pub use adapter::{PrepareTrainingData, RunAdapterTraining};
pub use knowledge::{IngestKnowledgeBase, WriteBehaviorSpec};
pub use packaging::{Finalize, PackageArtifact};

use crate::error::StageError;
use refinery_abstraction::ArtifactSpec;

/// Default context window for packaged artifacts.
pub const DEFAULT_CONTEXT_LENGTH: u32 = 4096;

/// Writes the rendered behavior spec into the artifact directory.
pub(crate) async fn write_behavior_spec(spec: &ArtifactSpec) -> Result<(), StageError> {
    tokio::fs::create_dir_all(&spec.directory).await?;
    tokio::fs::write(spec.spec_path(), spec.render()).await?;
    Ok(())
}
