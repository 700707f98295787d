//! CLI configuration loading.

use anyhow::{Context, Result};
use refinery_core::RefineryConfig;
use std::path::{Path, PathBuf};

/// Load the configuration for this invocation.
///
/// Configuration precedence:
/// 1. CLI arguments (`--workspace`)
/// 2. The file given with `--config`, or else the local `refinery.toml`
///    layered over the global `~/.refinery/config.toml`
/// 3. Defaults
pub fn load_config(path: Option<&Path>, workspace: Option<PathBuf>) -> Result<RefineryConfig> {
    let mut config = match path {
        Some(path) => RefineryConfig::load_from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => RefineryConfig::discover_and_load().context("Failed to load configuration")?,
    };

    if let Some(workspace) = workspace {
        config.workspace_root = Some(workspace);
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_workspace_flag_overrides_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("refinery.toml");
        std::fs::write(&path, "workspace_root = \"/from/file\"\n[orchestrator]\nmax_concurrent_jobs = 2\n").unwrap();

        let config = load_config(Some(&path), Some(temp.path().join("ws"))).unwrap();

        assert_eq!(config.workspace_root, Some(temp.path().join("ws")));
        assert_eq!(config.orchestrator.max_concurrent_jobs, 2);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        let err = load_config(Some(&temp.path().join("absent.toml")), None).unwrap_err();
        assert!(err.to_string().contains("Failed to load configuration"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("refinery.toml");
        std::fs::write(&path, "[stuck]\nprogress_threshold = 2.0\n").unwrap();

        assert!(load_config(Some(&path), None).is_err());
    }
}
