//! Orchestrator tuning knobs.

use std::time::Duration;

/// Thresholds used to decide that a running job has hung.
#[derive(Debug, Clone, PartialEq)]
pub struct StuckJobPolicy {
    /// Allowed runtime for adapter-tuning jobs before they are considered stuck.
    pub adapter_timeout: Duration,
    /// Allowed runtime for knowledge-augmentation jobs.
    pub knowledge_timeout: Duration,
    /// Jobs at or above this progress are never considered stuck.
    pub progress_threshold: f64,
}

impl Default for StuckJobPolicy {
    fn default() -> Self {
        Self {
            adapter_timeout: Duration::from_secs(30 * 60),
            knowledge_timeout: Duration::from_secs(10 * 60),
            progress_threshold: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum number of jobs executing at once.
    pub max_concurrent_jobs: usize,
    /// Interval between stuck-job sweeps when the sweeper is running.
    pub sweep_interval: Duration,
    /// Confirm with the model backend that packaged artifacts exist.
    pub verify_artifacts: bool,
    pub stuck: StuckJobPolicy,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 4,
            sweep_interval: Duration::from_secs(60),
            verify_artifacts: true,
            stuck: StuckJobPolicy::default(),
        }
    }
}
