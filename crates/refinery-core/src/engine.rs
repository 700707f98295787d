//! Wires configured adapters into a ready-to-use orchestrator.

use crate::backends::OllamaBackend;
use crate::config::RefineryConfig;
use crate::error::Result;
use crate::evaluation::BackendEvaluator;
use crate::knowledge::FileKnowledgeStore;
use crate::storage::SqliteJobStore;
use crate::training::{CommandTrainer, UnconfiguredTrainer};
use refinery_abstraction::{KnowledgeStore, ModelBackend};
use refinery_orchestrator::{EngineServices, JobOrchestrator};
use refinery_training::{AdapterTrainer, EvaluationLauncher, JobStore, WorkspaceLayout};
use std::sync::Arc;
use tracing::info;

/// Everything a front end needs: the store for record management and the
/// orchestrator for job control.
///
/// Call [`Engine::shutdown`] before exiting so launched evaluations finish.
pub struct Engine {
    pub config: RefineryConfig,
    pub store: Arc<dyn JobStore>,
    pub orchestrator: Arc<JobOrchestrator>,
    evaluator: Arc<BackendEvaluator>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Engine {
    /// Opens the database and constructs the configured collaborators.
    ///
    /// # Errors
    /// Fails if the workspace cannot be created, the database cannot be
    /// opened or the backend client cannot be constructed.
    pub fn bootstrap(config: RefineryConfig) -> Result<Self> {
        let workspace = config.workspace_root();
        std::fs::create_dir_all(&workspace)?;

        let store: Arc<dyn JobStore> = Arc::new(SqliteJobStore::open(&config.database_path())?);
        let backend: Arc<dyn ModelBackend> = Arc::new(OllamaBackend::from_config(&config.ollama)?);
        let knowledge: Arc<dyn KnowledgeStore> =
            Arc::new(FileKnowledgeStore::new(config.collections_dir()));
        let trainer: Arc<dyn AdapterTrainer> = match CommandTrainer::from_config(&config.trainer) {
            Some(trainer) => Arc::new(trainer),
            None => Arc::new(UnconfiguredTrainer),
        };
        let evaluator = Arc::new(
            BackendEvaluator::new(Arc::clone(&store), Arc::clone(&backend))
                .with_sample_limit(config.orchestrator.evaluation_sample_limit),
        );

        info!(
            workspace = %workspace.display(),
            backend = backend.id(),
            trainer = trainer.id(),
            "Engine ready"
        );

        let services = EngineServices {
            store: Arc::clone(&store),
            backend,
            knowledge,
            trainer,
            evaluations: Arc::clone(&evaluator) as Arc<dyn EvaluationLauncher>,
            layout: WorkspaceLayout::new(workspace),
        };
        let orchestrator = Arc::new(JobOrchestrator::new(services, config.orchestrator_config()));
        Ok(Self { config, store, orchestrator, evaluator })
    }

    /// Evaluations launched by this process that have not finished yet.
    #[must_use]
    pub fn pending_evaluations(&self) -> usize {
        self.evaluator.in_flight()
    }

    /// Waits for launched evaluations to finish.
    pub async fn shutdown(&self) {
        self.evaluator.drain().await;
        info!("Engine shut down");
    }
}
