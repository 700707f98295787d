//! Shared helpers for CLI integration tests.

#![allow(dead_code)]

use assert_cmd::Command;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Isolated home and workspace so no user configuration leaks into a test.
pub struct Sandbox {
    dir: TempDir,
}

impl Sandbox {
    pub fn new() -> Self {
        Self { dir: TempDir::new().unwrap() }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn workspace(&self) -> PathBuf {
        self.dir.path().join("workspace")
    }

    /// `refine` invocation pointed at this sandbox.
    pub fn refine(&self) -> Command {
        let mut cmd = Command::cargo_bin("refine").unwrap();
        cmd.current_dir(self.path())
            .env("HOME", self.path())
            .env("NO_COLOR", "1")
            .arg("--log-level")
            .arg("error")
            .arg("--workspace")
            .arg(self.workspace());
        cmd
    }

    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path().join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// Imports a small support dataset and returns its id.
    pub fn import_support_dataset(&self) -> i64 {
        let file = self.write(
            "support.jsonl",
            concat!(
                "{\"instruction\": \"When are you open?\", \"output\": \"Nine to five on weekdays\"}\n",
                "{\"instruction\": \"Do you ship abroad?\", \"output\": \"Yes, worldwide\"}\n",
                "{\"question\": \"How do I reset my password?\", \"answer\": \"Use the reset link\"}\n",
            ),
        );
        let output = self.refine().args(["datasets", "import"]).arg(file).arg("--json").output().unwrap();
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        let dataset: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        dataset["id"].as_i64().unwrap()
    }
}
