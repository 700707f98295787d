//! Integration tests for the before/after evaluation executor.

use async_trait::async_trait;
use refinery_abstraction::{ArtifactSpec, BackendError, BackendResult, ModelBackend};
use refinery_core::BackendEvaluator;
use refinery_training::{
    DatasetId, EvaluationKind, EvaluationLauncher, JobStore, MemoryJobStore, NewDataset,
    NewEvaluation, RunStatus,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Answers prompts per model from a fixed table; unknown models error.
#[derive(Default)]
struct ScriptedBackend {
    answers: HashMap<String, HashMap<String, String>>,
    prompts: Mutex<Vec<(String, String)>>,
}

impl ScriptedBackend {
    fn answer(mut self, model: &str, instruction: &str, response: &str) -> Self {
        self.answers
            .entry(model.to_string())
            .or_default()
            .insert(instruction.to_string(), response.to_string());
        self
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn id(&self) -> &'static str {
        "scripted"
    }

    async fn build(&self, spec: &ArtifactSpec) -> BackendResult<String> {
        Ok(spec.name.clone())
    }

    async fn remove(&self, _name: &str) -> BackendResult<bool> {
        Ok(true)
    }

    async fn query(&self, name: &str, prompt: &str) -> BackendResult<String> {
        self.prompts.lock().unwrap().push((name.to_string(), prompt.to_string()));
        let table = self
            .answers
            .get(name)
            .ok_or_else(|| BackendError::Request(format!("model '{name}' not found")))?;
        Ok(table
            .iter()
            .find(|(instruction, _)| prompt.contains(instruction.as_str()))
            .map(|(_, answer)| answer.clone())
            .unwrap_or_default())
    }

    async fn exists(&self, name: &str) -> BackendResult<bool> {
        Ok(self.answers.contains_key(name))
    }
}

async fn dataset(store: &MemoryJobStore) -> DatasetId {
    store
        .create_dataset(NewDataset {
            name: "geography".to_string(),
            description: None,
            samples: vec![
                json!({"instruction": "Capital of France?", "output": "The capital is Paris"}),
                json!({"instruction": "Capital of Japan?", "output": "The capital is Tokyo"}),
                json!({"instruction": "Largest ocean?", "input": "Earth", "output": "Pacific Ocean"}),
                json!({"instruction": "Longest river?", "output": "The Nile river"}),
            ],
        })
        .await
        .unwrap()
        .id
}

async fn evaluation(store: &MemoryJobStore, dataset_id: Option<DatasetId>) -> refinery_training::Evaluation {
    store
        .create_evaluation(NewEvaluation {
            job_id: None,
            model_name: "geo:latest".to_string(),
            base_model: "llama3:8b".to_string(),
            dataset_id,
            kind: EvaluationKind::Accuracy,
            notes: Some("Training evaluation: llama3:8b -> geo:latest".to_string()),
        })
        .await
        .unwrap()
}

fn backend() -> ScriptedBackend {
    ScriptedBackend::default()
        .answer("llama3:8b", "Capital of France?", "Paris, the capital.")
        .answer("llama3:8b", "Capital of Japan?", "Not sure.")
        .answer("geo:latest", "Capital of France?", "The capital is Paris.")
        .answer("geo:latest", "Capital of Japan?", "Tokyo is the capital.")
        .answer("geo:latest", "Largest ocean?", "The Pacific Ocean.")
}

#[tokio::test]
async fn test_run_records_before_and_after_metrics() {
    let store = Arc::new(MemoryJobStore::new());
    let dataset_id = dataset(&store).await;
    let created = evaluation(&store, Some(dataset_id)).await;
    let backend = Arc::new(backend());
    let evaluator = BackendEvaluator::new(store.clone(), backend.clone());

    let finished = evaluator.run(created.id).await.unwrap();

    assert_eq!(finished.status, RunStatus::Completed);
    assert!(finished.started_at.is_some());
    assert!(finished.completed_at.is_some());
    let before = finished.before_metrics.unwrap();
    let after = finished.after_metrics.unwrap();
    assert_eq!(before.samples, 4);
    assert!((before.accuracy - 0.25).abs() < 1e-9);
    assert!((after.accuracy - 0.75).abs() < 1e-9);
    assert!((finished.improvement.unwrap() - 0.5).abs() < 1e-9);
    let notes = finished.notes.unwrap();
    assert!(notes.starts_with("Training evaluation: llama3:8b -> geo:latest"));
    assert!(notes.contains("Evaluated 4 samples"));

    let prompts = backend.prompts.lock().unwrap();
    assert!(prompts.iter().any(|(_, p)| p == "### Instruction:\nLargest ocean?\n\n### Input:\nEarth\n\n### Response:"));
}

#[tokio::test]
async fn test_sample_limit_caps_queries() {
    let store = Arc::new(MemoryJobStore::new());
    let dataset_id = dataset(&store).await;
    let created = evaluation(&store, Some(dataset_id)).await;
    let backend = Arc::new(backend());
    let evaluator = BackendEvaluator::new(store.clone(), backend.clone()).with_sample_limit(2);

    let finished = evaluator.run(created.id).await.unwrap();

    assert_eq!(finished.after_metrics.unwrap().samples, 2);
    assert_eq!(backend.prompts.lock().unwrap().len(), 4);
}

#[tokio::test]
async fn test_missing_dataset_fails_evaluation() {
    let store = Arc::new(MemoryJobStore::new());
    let created = evaluation(&store, Some(DatasetId(404))).await;
    let evaluator = BackendEvaluator::new(store.clone(), Arc::new(backend()));

    let finished = evaluator.run(created.id).await.unwrap();

    assert_eq!(finished.status, RunStatus::Failed);
    assert_eq!(finished.error_message.as_deref(), Some("dataset error: Dataset 404 not found"));
}

#[tokio::test]
async fn test_unreachable_model_fails_evaluation() {
    let store = Arc::new(MemoryJobStore::new());
    let dataset_id = dataset(&store).await;
    let created = evaluation(&store, Some(dataset_id)).await;
    let backend = ScriptedBackend::default().answer("llama3:8b", "Capital of France?", "Paris");
    let evaluator = BackendEvaluator::new(store.clone(), Arc::new(backend));

    let finished = evaluator.run(created.id).await.unwrap();

    assert_eq!(finished.status, RunStatus::Failed);
    assert!(finished.error_message.unwrap().contains("geo:latest"));
}

#[tokio::test]
async fn test_launch_runs_in_background() {
    let store = Arc::new(MemoryJobStore::new());
    let dataset_id = dataset(&store).await;
    let created = evaluation(&store, Some(dataset_id)).await;
    let evaluator = BackendEvaluator::new(store.clone(), Arc::new(backend()));

    evaluator.launch(&created).await.unwrap();

    let mut status = RunStatus::Pending;
    for _ in 0..100 {
        status = store.get_evaluation(created.id).await.unwrap().unwrap().status;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, RunStatus::Completed);
}

#[tokio::test]
async fn test_drain_waits_for_launched_evaluations() {
    let store = Arc::new(MemoryJobStore::new());
    let dataset_id = dataset(&store).await;
    let first = evaluation(&store, Some(dataset_id)).await;
    let second = evaluation(&store, None).await;
    let evaluator = BackendEvaluator::new(store.clone(), Arc::new(backend()));

    evaluator.launch(&first).await.unwrap();
    evaluator.launch(&second).await.unwrap();
    evaluator.drain().await;

    assert_eq!(evaluator.in_flight(), 0);
    for id in [first.id, second.id] {
        let status = store.get_evaluation(id).await.unwrap().unwrap().status;
        assert!(status.is_terminal(), "evaluation {id} left {status}");
    }
    assert_eq!(store.get_evaluation(first.id).await.unwrap().unwrap().status, RunStatus::Completed);
}
