//! Configuration file support.
//!
//! Configuration is read from TOML files. The global file
//! (`~/.refinery/config.toml`) is loaded first and the local file
//! (`./refinery.toml`) is layered on top, table by table.

use refinery_orchestrator::{OrchestratorConfig, StuckJobPolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Model backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OllamaSection {
    /// Executable used for `create`, `rm` and `list`.
    pub binary: String,
    /// Base URL of the HTTP API used for queries.
    pub host: String,
    /// Upper bound for a single artifact build.
    pub build_timeout_secs: u64,
    /// Timeout for a single generation request.
    pub request_timeout_secs: u64,
    /// Confirm that packaged artifacts exist before completing a job.
    pub verify_artifacts: bool,
}

impl Default for OllamaSection {
    fn default() -> Self {
        Self {
            binary: "ollama".to_string(),
            host: "http://localhost:11434".to_string(),
            build_timeout_secs: 600,
            request_timeout_secs: 120,
            verify_artifacts: true,
        }
    }
}

/// External adapter trainer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerSection {
    /// Program launched for each adapter-tuning job.
    pub command: Option<String>,
    /// Extra arguments placed before the generated ones.
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeSection {
    /// Directory holding one sub-directory per collection.
    pub collections_dir: Option<PathBuf>,
}

/// Stuck-job thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StuckSection {
    pub adapter_timeout_minutes: u64,
    pub knowledge_timeout_minutes: u64,
    pub progress_threshold: f64,
}

impl Default for StuckSection {
    fn default() -> Self {
        Self { adapter_timeout_minutes: 30, knowledge_timeout_minutes: 10, progress_threshold: 0.5 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorSection {
    pub max_concurrent_jobs: usize,
    pub sweep_interval_secs: u64,
    /// Maximum samples scored per evaluation.
    pub evaluation_sample_limit: usize,
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self { max_concurrent_jobs: 4, sweep_interval_secs: 60, evaluation_sample_limit: 100 }
    }
}

/// Root configuration for Refinery.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineryConfig {
    /// Directory holding training data and model artifacts.
    pub workspace_root: Option<PathBuf>,
    /// SQLite database file.
    pub database_path: Option<PathBuf>,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: Option<String>,
    pub ollama: OllamaSection,
    pub trainer: TrainerSection,
    pub knowledge: KnowledgeSection,
    pub stuck: StuckSection,
    pub orchestrator: OrchestratorSection,
}

impl RefineryConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        let value = read_table(path)?;
        Self::from_value(value, path)
    }

    /// Get default global configuration file path.
    pub fn default_global_path() -> PathBuf {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".refinery").join("config.toml")
    }

    /// Get default local configuration file path.
    pub fn default_local_path() -> PathBuf {
        PathBuf::from("refinery.toml")
    }

    /// Discover and load configuration files.
    ///
    /// Loads configuration from:
    /// 1. Global config (~/.refinery/config.toml)
    /// 2. Local config (./refinery.toml)
    ///
    /// Local config overrides global config. Missing files are skipped;
    /// malformed ones are an error.
    pub fn discover_and_load() -> ConfigResult<Self> {
        Self::load_layers(&[Self::default_global_path(), Self::default_local_path()])
    }

    /// Loads and merges `paths` in order, later files overriding earlier ones.
    pub fn load_layers(paths: &[PathBuf]) -> ConfigResult<Self> {
        let mut merged = toml::Value::Table(toml::map::Map::new());
        let mut source = PathBuf::from("<defaults>");
        for path in paths {
            match read_table(path) {
                Ok(layer) => {
                    merge_values(&mut merged, layer);
                    source.clone_from(path);
                }
                Err(ConfigError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Self::from_value(merged, &source)
    }

    fn from_value(value: toml::Value, path: &Path) -> ConfigResult<Self> {
        let config: Self = value
            .try_into()
            .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges the types cannot express.
    pub fn validate(&self) -> ConfigResult<()> {
        if !(0.0..=1.0).contains(&self.stuck.progress_threshold) {
            return Err(ConfigError::InvalidValue(format!(
                "stuck.progress_threshold must be within [0, 1], got {}",
                self.stuck.progress_threshold
            )));
        }
        if self.orchestrator.max_concurrent_jobs == 0 {
            return Err(ConfigError::InvalidValue(
                "orchestrator.max_concurrent_jobs must be at least 1".to_string(),
            ));
        }
        if self.orchestrator.sweep_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "orchestrator.sweep_interval_secs must be at least 1".to_string(),
            ));
        }
        if let Some(level) = &self.log_level
            && !matches!(
                level.to_ascii_lowercase().as_str(),
                "trace" | "debug" | "info" | "warn" | "error"
            )
        {
            return Err(ConfigError::InvalidValue(format!("unknown log level: {level}")));
        }
        Ok(())
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(format!("Failed to serialize: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::ReadError(format!("Failed to create directory: {}", e)))?;
        }
        std::fs::write(path, content)
            .map_err(|e| ConfigError::ReadError(format!("Failed to write file: {}", e)))
    }

    /// Workspace root, defaulting to `~/.refinery/workspace`.
    pub fn workspace_root(&self) -> PathBuf {
        self.workspace_root.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".refinery")
                .join("workspace")
        })
    }

    /// Database file, defaulting to `refinery.db` inside the workspace.
    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| self.workspace_root().join("refinery.db"))
    }

    /// Knowledge collections directory, defaulting to `knowledge/` inside the workspace.
    pub fn collections_dir(&self) -> PathBuf {
        self.knowledge
            .collections_dir
            .clone()
            .unwrap_or_else(|| self.workspace_root().join("knowledge"))
    }

    pub fn stuck_policy(&self) -> StuckJobPolicy {
        StuckJobPolicy {
            adapter_timeout: Duration::from_secs(self.stuck.adapter_timeout_minutes * 60),
            knowledge_timeout: Duration::from_secs(self.stuck.knowledge_timeout_minutes * 60),
            progress_threshold: self.stuck.progress_threshold,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_concurrent_jobs: self.orchestrator.max_concurrent_jobs,
            sweep_interval: Duration::from_secs(self.orchestrator.sweep_interval_secs),
            verify_artifacts: self.ollama.verify_artifacts,
            stuck: self.stuck_policy(),
        }
    }
}

fn read_table(path: &Path) -> ConfigResult<toml::Value> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
}

/// Overlays `layer` onto `base`, recursing into tables.
fn merge_values(base: &mut toml::Value, layer: toml::Value) {
    match (base, layer) {
        (toml::Value::Table(base), toml::Value::Table(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}
