//! Integration tests for `refine jobs`.

mod common;

use common::Sandbox;
use predicates::prelude::*;
use serde_json::Value;

fn create_job(sandbox: &Sandbox, job_type: &str, dataset: i64) -> Value {
    let output = sandbox
        .refine()
        .args(["jobs", "create", "Support Bot", "--type", job_type, "--base-model", "llama3:8b"])
        .args(["--version", "1.0", "--dataset", &dataset.to_string(), "--json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_create_derives_target_name() {
    let sandbox = Sandbox::new();
    let dataset = sandbox.import_support_dataset();

    let job = create_job(&sandbox, "knowledge", dataset);

    assert_eq!(job["status"], "PENDING");
    assert_eq!(job["job_type"], "knowledge_augmentation");
    assert_eq!(job["target_name"], "support-bot:1.0");
    assert_eq!(job["config"]["selectedDatasets"][0], dataset);
}

#[test]
fn test_create_rejects_unknown_dataset() {
    let sandbox = Sandbox::new();

    sandbox
        .refine()
        .args(["jobs", "create", "Bot", "--type", "adapter", "--base-model", "llama3:8b", "--dataset", "42"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Dataset 42 not found"));
}

#[test]
fn test_create_rejects_unknown_type_and_bad_hyperparameters() {
    let sandbox = Sandbox::new();

    sandbox
        .refine()
        .args(["jobs", "create", "Bot", "--type", "distill", "--base-model", "llama3:8b"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown job type"));

    sandbox
        .refine()
        .args(["jobs", "create", "Bot", "--type", "adapter", "--base-model", "llama3:8b", "--epochs", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("epochs must be >= 1"));
}

#[test]
fn test_list_show_and_status() {
    let sandbox = Sandbox::new();
    let dataset = sandbox.import_support_dataset();
    let job = create_job(&sandbox, "adapter", dataset);
    let id = job["id"].as_i64().unwrap().to_string();

    let output = sandbox.refine().args(["jobs", "list", "--status", "pending", "--json"]).output().unwrap();
    let jobs: Vec<Value> = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(jobs.len(), 1);

    let output = sandbox.refine().args(["jobs", "list", "--status", "running", "--json"]).output().unwrap();
    let jobs: Vec<Value> = serde_json::from_slice(&output.stdout).unwrap();
    assert!(jobs.is_empty());

    sandbox
        .refine()
        .args(["jobs", "show", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("support-bot:1.0"))
        .stdout(predicate::str::contains("PENDING"));

    let output = sandbox.refine().args(["jobs", "status", &id, "--json"]).output().unwrap();
    let view: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(view["status"], "PENDING");
    assert_eq!(view["running"], false);
}

#[test]
fn test_run_adapter_job_without_trainer_fails() {
    let sandbox = Sandbox::new();
    let dataset = sandbox.import_support_dataset();
    let job = create_job(&sandbox, "adapter", dataset);
    let id = job["id"].as_i64().unwrap().to_string();

    sandbox
        .refine()
        .args(["jobs", "run", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No adapter trainer configured"));

    let output = sandbox.refine().args(["jobs", "show", &id, "--json"]).output().unwrap();
    let job: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(job["status"], "FAILED");
    assert!(job["completed_at"].is_string());

    // A finished job cannot be started again
    sandbox
        .refine()
        .args(["jobs", "run", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be started"));
}

#[test]
fn test_stop_pending_job_is_a_no_op() {
    let sandbox = Sandbox::new();
    let dataset = sandbox.import_support_dataset();
    let job = create_job(&sandbox, "adapter", dataset);
    let id = job["id"].as_i64().unwrap().to_string();

    sandbox
        .refine()
        .args(["jobs", "stop", &id])
        .assert()
        .success()
        .stdout(predicate::str::contains("is not running"));
}

#[test]
fn test_delete_removes_job() {
    let sandbox = Sandbox::new();
    let dataset = sandbox.import_support_dataset();
    let job = create_job(&sandbox, "adapter", dataset);
    let id = job["id"].as_i64().unwrap().to_string();

    let output = sandbox.refine().args(["jobs", "delete", &id, "--json"]).output().unwrap();
    assert!(output.status.success());
    let report: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["record_deleted"], true);

    sandbox
        .refine()
        .args(["jobs", "show", &id])
        .assert()
        .failure()
        .stderr(predicate::str::contains(format!("Job {id} not found")));
}

#[test]
fn test_sweep_with_nothing_running() {
    let sandbox = Sandbox::new();

    sandbox
        .refine()
        .args(["jobs", "sweep"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No stuck jobs"));
}
