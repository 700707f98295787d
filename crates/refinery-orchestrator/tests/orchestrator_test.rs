//! Integration tests for job execution through the orchestrator.

mod common;

use common::{Harness, MockTrainer};
use refinery_orchestrator::{OrchestrationError, OrchestratorConfig};
use refinery_training::{DatasetId, JobId, JobStore, JobType, JobUpdate, RunStatus, WorkspaceLayout};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[tokio::test]
async fn test_adapter_job_end_to_end() {
    let harness = Harness::new();
    let dataset = harness.dataset("support-faq", 10, 0).await;
    let job = harness.job("Support Bot", JobType::AdapterTuning, &[dataset.id]).await;
    let orchestrator = harness.orchestrator();

    assert!(orchestrator.start(job.id).await.unwrap());
    assert!(orchestrator.wait(job.id).await);

    let job = harness.reload(job.id).await;
    assert_eq!(job.status, RunStatus::Completed);
    assert!((job.progress - 1.0).abs() < f64::EPSILON);
    assert_eq!(job.resolved_artifact.as_deref(), Some("support-bot:1.0"));
    assert!(job.completed_at.is_some());
    assert!(job.error_message.is_none());

    let evaluations = harness.store.list_evaluations().await.unwrap();
    assert_eq!(evaluations.len(), 1);
    assert_eq!(evaluations[0].dataset_id, Some(dataset.id));
    assert_eq!(evaluations[0].model_name, "support-bot:1.0");
    assert_eq!(evaluations[0].job_id, Some(job.id));
    assert_eq!(harness.launcher.launched.lock().unwrap().len(), 1);

    let layout = harness.layout();
    let train = std::fs::read_to_string(layout.train_path(job.id)).unwrap();
    let val = std::fs::read_to_string(layout.val_path(job.id)).unwrap();
    assert_eq!(train.lines().count(), 8);
    assert_eq!(val.lines().count(), 2);
    assert!(layout.manifest_path(job.id).exists());

    let builds = harness.backend.builds.lock().unwrap();
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].base, "llama3:8b");
    assert!(builds[0].adapter.is_some());
    let modelfile = std::fs::read_to_string(builds[0].spec_path()).unwrap();
    assert!(modelfile.contains("SYSTEM \"You are support-bot, fine-tuned using LoRA.\""));
    assert!(orchestrator.active_jobs().is_empty());
}

#[tokio::test]
async fn test_progress_is_non_decreasing() {
    let trainer = MockTrainer { fractions: vec![0.5, 0.25, 1.0], ..MockTrainer::default() };
    let harness = Harness::with_trainer(trainer);
    let dataset = harness.dataset("faq", 5, 0).await;
    let job = harness.job("Mono", JobType::AdapterTuning, &[dataset.id]).await;
    let orchestrator = harness.orchestrator();

    orchestrator.start(job.id).await.unwrap();
    orchestrator.wait(job.id).await;

    let writes = harness.store.progress_for(job.id);
    assert!(writes.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {writes:?}");
    assert!(writes.iter().any(|p| (p - 0.5).abs() < 1e-9));
    assert!(writes.iter().any(|p| (p - 0.95).abs() < 1e-9));
    assert!((writes.last().copied().unwrap() - 1.0).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_knowledge_job_end_to_end() {
    let harness = Harness::new();
    let dataset = harness.dataset("runbooks", 4, 2).await;
    let job = harness.job("Ops Helper", JobType::KnowledgeAugmentation, &[dataset.id]).await;
    let orchestrator = harness.orchestrator();

    orchestrator.start(job.id).await.unwrap();
    orchestrator.wait(job.id).await;

    let job = harness.reload(job.id).await;
    assert_eq!(job.status, RunStatus::Completed);
    assert_eq!(job.resolved_artifact.as_deref(), Some("ops-helper:1.0"));

    let records = harness.knowledge.records(&WorkspaceLayout::collection_name(job.id)).unwrap();
    assert_eq!(records.len(), 4);
    assert_eq!(records[0].source, "runbooks");

    let builds = harness.backend.builds.lock().unwrap();
    assert!(builds[0].adapter.is_none());
    let rendered = builds[0].render();
    assert!(rendered.contains("PARAMETER top_k 40"));
    assert!(rendered.contains("PARAMETER temperature 0.8"));
    assert!(rendered.contains("comprehensive knowledge base"));
}

#[tokio::test]
async fn test_knowledge_job_without_datasets_skips_ingestion() {
    let harness = Harness::new();
    let job = harness.job("Plain", JobType::KnowledgeAugmentation, &[]).await;
    let orchestrator = harness.orchestrator();

    orchestrator.start(job.id).await.unwrap();
    orchestrator.wait(job.id).await;

    let job = harness.reload(job.id).await;
    assert_eq!(job.status, RunStatus::Completed);
    assert!(harness.knowledge.collections.lock().unwrap().is_empty());
    assert!(harness.store.progress_for(job.id).iter().any(|p| (p - 0.6).abs() < 1e-9));
    assert!(harness.store.list_evaluations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_role_definition_overrides_system_prompt() {
    let harness = Harness::new();
    let job = harness
        .store
        .create_job(
            refinery_training::NewJob::new("Poet", JobType::KnowledgeAugmentation, "llama3:8b")
                .with_config(serde_json::json!({ "roleDefinition": "You write haiku.", "temperature": 0.3 })),
        )
        .await
        .unwrap();
    let orchestrator = harness.orchestrator();

    orchestrator.start(job.id).await.unwrap();
    orchestrator.wait(job.id).await;

    let builds = harness.backend.builds.lock().unwrap();
    assert_eq!(builds[0].name, "poet:latest");
    assert_eq!(builds[0].system_prompt, "You write haiku.");
    assert!(builds[0].render().contains("PARAMETER temperature 0.3"));
}

#[tokio::test]
async fn test_no_valid_samples_fails_job() {
    let harness = Harness::new();
    let dataset = harness.dataset("junk", 0, 5).await;
    let job = harness.job("Empty", JobType::AdapterTuning, &[dataset.id]).await;
    let orchestrator = harness.orchestrator();

    orchestrator.start(job.id).await.unwrap();
    orchestrator.wait(job.id).await;

    let job = harness.reload(job.id).await;
    assert_eq!(job.status, RunStatus::Failed);
    let message = job.error_message.unwrap();
    assert!(message.starts_with("PrepareTrainingData failed:"));
    assert!(message.contains("No training samples found"));
    assert!(message.contains("junk"));
    assert!(job.completed_at.is_some());
    assert!(job.resolved_artifact.is_none());
    assert!(harness.backend.builds.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_dataset_is_named_in_failure() {
    let harness = Harness::new();
    let job = harness.job("Orphan", JobType::AdapterTuning, &[DatasetId(999)]).await;
    let orchestrator = harness.orchestrator();

    orchestrator.start(job.id).await.unwrap();
    orchestrator.wait(job.id).await;

    let job = harness.reload(job.id).await;
    assert_eq!(job.status, RunStatus::Failed);
    assert_eq!(
        job.error_message.as_deref(),
        Some("PrepareTrainingData failed: No training samples found. Valid datasets: [#999 (missing)]")
    );
}

#[tokio::test]
async fn test_adapter_job_without_datasets_fails() {
    let harness = Harness::new();
    let job = harness.job("Nothing", JobType::AdapterTuning, &[]).await;
    let orchestrator = harness.orchestrator();

    orchestrator.start(job.id).await.unwrap();
    orchestrator.wait(job.id).await;

    let job = harness.reload(job.id).await;
    assert_eq!(job.status, RunStatus::Failed);
    assert!(job.error_message.unwrap().contains("No datasets selected for LoRA training"));
}

#[tokio::test]
async fn test_backend_failure_message_preserved() {
    let harness = Harness::new();
    harness.backend.fail_build.store(true, Ordering::SeqCst);
    let dataset = harness.dataset("faq", 5, 0).await;
    let job = harness.job("Broken", JobType::AdapterTuning, &[dataset.id]).await;
    let orchestrator = harness.orchestrator();

    orchestrator.start(job.id).await.unwrap();
    orchestrator.wait(job.id).await;

    let job = harness.reload(job.id).await;
    assert_eq!(job.status, RunStatus::Failed);
    let message = job.error_message.unwrap();
    assert!(message.starts_with("PackageArtifact failed:"));
    assert!(message.contains("model base not found"));
    assert!(harness.store.list_evaluations().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_trainer_failure_fails_job() {
    let trainer = MockTrainer { fail: Some("CUDA out of memory".to_string()), ..MockTrainer::default() };
    let harness = Harness::with_trainer(trainer);
    let dataset = harness.dataset("faq", 5, 0).await;
    let job = harness.job("Oom", JobType::AdapterTuning, &[dataset.id]).await;
    let orchestrator = harness.orchestrator();

    orchestrator.start(job.id).await.unwrap();
    orchestrator.wait(job.id).await;

    let job = harness.reload(job.id).await;
    assert_eq!(job.status, RunStatus::Failed);
    assert_eq!(
        job.error_message.as_deref(),
        Some("RunAdapterTraining failed: trainer error: CUDA out of memory")
    );
}

#[tokio::test]
async fn test_start_rejects_unknown_and_active_jobs() {
    let (trainer, gate) = MockTrainer::gated();
    let harness = Harness::with_trainer(trainer);
    let dataset = harness.dataset("faq", 5, 0).await;
    let job = harness.job("Busy", JobType::AdapterTuning, &[dataset.id]).await;
    let orchestrator = harness.orchestrator();

    assert!(matches!(
        orchestrator.start(JobId(999)).await,
        Err(OrchestrationError::NotFound(JobId(999)))
    ));

    assert!(orchestrator.start(job.id).await.unwrap());
    assert!(matches!(
        orchestrator.start(job.id).await,
        Err(OrchestrationError::AlreadyActive(_))
    ));

    gate.notify_one();
    orchestrator.wait(job.id).await;
    assert!(matches!(
        orchestrator.start(job.id).await,
        Err(OrchestrationError::NotStartable { status: RunStatus::Completed, .. })
    ));
}

#[tokio::test]
async fn test_stop_running_job() {
    let (trainer, gate) = MockTrainer::gated();
    let harness = Harness::with_trainer(trainer);
    let dataset = harness.dataset("faq", 5, 0).await;
    let job = harness.job("Halt", JobType::AdapterTuning, &[dataset.id]).await;
    let orchestrator = harness.orchestrator();

    orchestrator.start(job.id).await.unwrap();
    harness.trainer.started.notified().await;

    let view = orchestrator.status(job.id).await.unwrap().unwrap();
    assert!(view.running);
    assert_eq!(view.status, RunStatus::Running);

    assert!(orchestrator.stop(job.id).await.unwrap());
    assert!(orchestrator.active_jobs().is_empty());
    assert!(!orchestrator.stop(job.id).await.unwrap());

    gate.notify_one();
    for _ in 0..100 {
        if harness.trainer.finished.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let job = harness.reload(job.id).await;
    assert_eq!(job.status, RunStatus::Stopped);
    assert!(job.completed_at.is_some());
    assert!(job.resolved_artifact.is_none());
    assert!(harness.backend.builds.lock().unwrap().is_empty());
    assert!(harness.store.list_evaluations().await.unwrap().is_empty());

    let view = orchestrator.status(job.id).await.unwrap().unwrap();
    assert!(!view.running);
    assert_eq!(view.status, RunStatus::Stopped);
}

#[tokio::test]
async fn test_capacity_limit_fails_scheduling() {
    let (trainer, gate) = MockTrainer::gated();
    let harness = Harness::with_trainer(trainer);
    let dataset = harness.dataset("faq", 5, 0).await;
    let first = harness.job("First", JobType::AdapterTuning, &[dataset.id]).await;
    let second = harness.job("Second", JobType::AdapterTuning, &[dataset.id]).await;
    let orchestrator =
        harness.orchestrator_with(OrchestratorConfig { max_concurrent_jobs: 1, ..Default::default() });

    assert!(orchestrator.start(first.id).await.unwrap());
    assert!(!orchestrator.has_capacity());
    assert!(!orchestrator.start(second.id).await.unwrap());

    let second = harness.reload(second.id).await;
    assert_eq!(second.status, RunStatus::Failed);
    assert!(second.error_message.unwrap().starts_with("Scheduling failed:"));

    gate.notify_one();
    orchestrator.wait(first.id).await;
    assert_eq!(harness.reload(first.id).await.status, RunStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_respect_capacity() {
    let (trainer, _gate) = MockTrainer::gated();
    let harness = Harness::with_trainer(trainer);
    let dataset = harness.dataset("faq", 5, 0).await;
    let mut ids = Vec::new();
    for i in 0..6 {
        ids.push(harness.job(&format!("Burst {i}"), JobType::AdapterTuning, &[dataset.id]).await.id);
    }
    let orchestrator = Arc::new(
        harness.orchestrator_with(OrchestratorConfig { max_concurrent_jobs: 2, ..Default::default() }),
    );

    let starts: Vec<_> = ids
        .iter()
        .map(|id| {
            let orchestrator = Arc::clone(&orchestrator);
            let id = *id;
            tokio::spawn(async move { orchestrator.start(id).await.unwrap() })
        })
        .collect();
    let mut started = 0;
    for start in starts {
        if start.await.unwrap() {
            started += 1;
        }
    }

    assert_eq!(started, 2);
    assert_eq!(orchestrator.active_jobs().len(), 2);
    let mut failed = 0;
    for id in &ids {
        if harness.reload(*id).await.status == RunStatus::Failed {
            failed += 1;
        }
    }
    assert_eq!(failed, 4);

    for id in orchestrator.active_jobs() {
        assert!(orchestrator.stop(id).await.unwrap());
    }
}

#[tokio::test]
async fn test_status_of_unknown_job_is_absent() {
    let harness = Harness::new();
    let orchestrator = harness.orchestrator();
    assert!(orchestrator.status(JobId(42)).await.unwrap().is_none());
}

#[tokio::test]
async fn test_sweep_fails_stuck_jobs() {
    let harness = Harness::new();
    let job = harness.job("Hung", JobType::AdapterTuning, &[DatasetId(1)]).await;
    let update = JobUpdate::new()
        .status(RunStatus::Running)
        .started_at(chrono::Utc::now() - chrono::Duration::minutes(31))
        .progress(0.3);
    harness.store.update_job(job.id, &update).await.unwrap();
    let orchestrator = harness.orchestrator();

    assert_eq!(orchestrator.sweep_stuck_jobs().await.unwrap(), vec![job.id]);
    let job = harness.reload(job.id).await;
    assert_eq!(job.status, RunStatus::Failed);
    assert!(job.error_message.unwrap().starts_with("Training stuck for 31 minutes"));
}

#[tokio::test]
async fn test_periodic_sweeper() {
    let harness = Harness::new();
    let job = harness.job("Hung", JobType::KnowledgeAugmentation, &[]).await;
    let update = JobUpdate::new()
        .status(RunStatus::Running)
        .started_at(chrono::Utc::now() - chrono::Duration::minutes(15))
        .progress(0.1);
    harness.store.update_job(job.id, &update).await.unwrap();

    let orchestrator = Arc::new(harness.orchestrator());
    let sweeper = orchestrator.spawn_stuck_sweeper(Duration::from_millis(10));
    let job = harness.settle(job.id).await;
    sweeper.shutdown().await;

    assert_eq!(job.status, RunStatus::Failed);
}

#[tokio::test]
async fn test_evaluation_launch_failure_keeps_job_completed() {
    let harness = Harness::new();
    harness.launcher.fail.store(true, Ordering::SeqCst);
    let dataset = harness.dataset("faq", 5, 0).await;
    let job = harness.job("Eval", JobType::AdapterTuning, &[dataset.id]).await;
    let orchestrator = harness.orchestrator();

    orchestrator.start(job.id).await.unwrap();
    orchestrator.wait(job.id).await;

    assert_eq!(harness.reload(job.id).await.status, RunStatus::Completed);
    let evaluations = harness.store.list_evaluations().await.unwrap();
    assert_eq!(evaluations.len(), 1);
    assert_eq!(evaluations[0].status, RunStatus::Failed);
    assert!(evaluations[0].error_message.as_deref().unwrap().contains("evaluator unavailable"));
}
