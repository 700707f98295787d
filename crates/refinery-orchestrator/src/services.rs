//! Collaborators shared by every job execution.

use refinery_abstraction::{KnowledgeStore, ModelBackend};
use refinery_training::{AdapterTrainer, EvaluationLauncher, JobStore, WorkspaceLayout};
use std::fmt;
use std::sync::Arc;

/// Handles to the external systems the engine drives.
#[derive(Clone)]
pub struct EngineServices {
    pub store: Arc<dyn JobStore>,
    pub backend: Arc<dyn ModelBackend>,
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub trainer: Arc<dyn AdapterTrainer>,
    pub evaluations: Arc<dyn EvaluationLauncher>,
    pub layout: WorkspaceLayout,
}

impl fmt::Debug for EngineServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineServices")
            .field("backend", &self.backend.id())
            .field("trainer", &self.trainer.id())
            .field("workspace", &self.layout.root())
            .finish_non_exhaustive()
    }
}
