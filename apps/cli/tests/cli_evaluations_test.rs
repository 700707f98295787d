//! Integration tests for `refine evaluations` and `refine config`.

mod common;

use common::Sandbox;
use predicates::prelude::*;

#[test]
fn test_no_evaluations() {
    let sandbox = Sandbox::new();

    sandbox
        .refine()
        .args(["evaluations", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No evaluations found"));

    sandbox
        .refine()
        .args(["evaluations", "show", "3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Evaluation 3 not found"));
}

#[test]
fn test_config_reflects_workspace_and_local_file() {
    let sandbox = Sandbox::new();
    sandbox.write("refinery.toml", "[orchestrator]\nmax_concurrent_jobs = 2\n");

    let output = sandbox.refine().args(["config", "--json"]).output().unwrap();
    assert!(output.status.success());
    let config: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();

    assert_eq!(config["orchestrator"]["max_concurrent_jobs"], 2);
    assert_eq!(config["workspace_root"], sandbox.workspace().display().to_string());
}

#[test]
fn test_invalid_local_config_fails() {
    let sandbox = Sandbox::new();
    sandbox.write("refinery.toml", "[stuck]\nprogress_threshold = 1.5\n");

    sandbox
        .refine()
        .args(["jobs", "list"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("progress_threshold"));
}
