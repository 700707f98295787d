//! Before/after accuracy evaluation against a model backend.

use async_trait::async_trait;
use chrono::Utc;
use refinery_abstraction::ModelBackend;
use refinery_training::{
    Evaluation, EvaluationId, EvaluationLauncher, EvaluationUpdate, JobStore, RunStatus,
    SampleRecord, TrainingError, TrainingResult,
};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use super::scoring::{build_prompt, is_correct, Tally};

/// Default number of samples scored per evaluation.
pub const DEFAULT_SAMPLE_LIMIT: usize = 100;

/// Scores the base and customized artifacts on the evaluation's dataset.
///
/// Launched runs are tracked; [`BackendEvaluator::drain`] waits for them.
#[derive(Clone)]
pub struct BackendEvaluator {
    store: Arc<dyn JobStore>,
    backend: Arc<dyn ModelBackend>,
    sample_limit: usize,
    tasks: TaskTracker,
}

impl std::fmt::Debug for BackendEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendEvaluator")
            .field("backend", &self.backend.id())
            .field("sample_limit", &self.sample_limit)
            .field("in_flight", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl BackendEvaluator {
    pub fn new(store: Arc<dyn JobStore>, backend: Arc<dyn ModelBackend>) -> Self {
        Self { store, backend, sample_limit: DEFAULT_SAMPLE_LIMIT, tasks: TaskTracker::new() }
    }

    /// Number of launched evaluations still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Waits for every launched evaluation to reach a terminal state.
    ///
    /// Evaluations launched after the drain begins are waited for as well.
    pub async fn drain(&self) {
        let pending = self.tasks.len();
        if pending > 0 {
            info!(pending, "Waiting for evaluations to finish");
        }
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    #[must_use]
    pub fn with_sample_limit(mut self, sample_limit: usize) -> Self {
        self.sample_limit = sample_limit.max(1);
        self
    }

    /// Runs an evaluation to completion, persisting its outcome.
    ///
    /// # Arguments
    /// * `id` - Evaluation to run; it is moved to RUNNING first
    ///
    /// # Returns
    /// The evaluation as persisted after the run.
    ///
    /// # Errors
    /// Only persistence failures are returned. Evaluation failures are
    /// recorded on the record as FAILED with an error message.
    pub async fn run(&self, id: EvaluationId) -> TrainingResult<Evaluation> {
        let evaluation = self
            .store
            .get_evaluation(id)
            .await?
            .ok_or_else(|| TrainingError::InvalidSpec(format!("evaluation {id} not found")))?;

        self.store
            .update_evaluation(
                id,
                &EvaluationUpdate::new().status(RunStatus::Running).started_at(Utc::now()),
            )
            .await?;

        let update = match self.score(&evaluation).await {
            Ok(update) => update,
            Err(e) => {
                error!(evaluation_id = %id, error = %e, "Evaluation failed");
                EvaluationUpdate::new()
                    .status(RunStatus::Failed)
                    .error_message(e.to_string())
                    .completed_at(Utc::now())
            }
        };
        self.store.update_evaluation(id, &update).await?;

        self.store
            .get_evaluation(id)
            .await?
            .ok_or_else(|| TrainingError::InvalidSpec(format!("evaluation {id} disappeared")))
    }

    async fn samples(&self, evaluation: &Evaluation) -> TrainingResult<Vec<SampleRecord>> {
        let dataset_id = evaluation
            .dataset_id
            .ok_or_else(|| TrainingError::Dataset("Evaluation has no dataset".to_string()))?;
        let dataset = self
            .store
            .get_dataset(dataset_id)
            .await?
            .ok_or_else(|| TrainingError::Dataset(format!("Dataset {dataset_id} not found")))?;
        let samples: Vec<SampleRecord> =
            dataset.training_samples().into_iter().take(self.sample_limit).collect();
        if samples.is_empty() {
            return Err(TrainingError::Dataset(format!("No samples found in dataset {dataset_id}")));
        }
        Ok(samples)
    }

    async fn tally(&self, model: &str, samples: &[SampleRecord]) -> TrainingResult<Tally> {
        let mut tally = Tally::default();
        let mut last_error = None;
        for sample in samples {
            let prompt = build_prompt(sample);
            let started = Instant::now();
            match self.backend.query(model, &prompt).await {
                Ok(response) => {
                    tally.record(
                        is_correct(&sample.output, &response),
                        started.elapsed().as_secs_f64(),
                    );
                }
                Err(e) => {
                    warn!(model, error = %e, "Evaluation query failed");
                    tally.record_failure();
                    last_error = Some(e);
                }
            }
        }
        if tally.all_failed()
            && let Some(e) = last_error
        {
            return Err(e.into());
        }
        Ok(tally)
    }

    async fn score(&self, evaluation: &Evaluation) -> TrainingResult<EvaluationUpdate> {
        let samples = self.samples(evaluation).await?;
        info!(
            evaluation_id = %evaluation.id,
            model = %evaluation.model_name,
            samples = samples.len(),
            "Scoring evaluation"
        );

        let before = self.tally(&evaluation.base_model, &samples).await?.metrics();
        let after = self.tally(&evaluation.model_name, &samples).await?.metrics();

        let mut notes = format!(
            "Evaluated {} samples. Model achieved {:.1}% accuracy ({:+.1} points over {}) with {:.0}ms average inference time.",
            after.samples,
            after.accuracy * 100.0,
            (after.accuracy - before.accuracy) * 100.0,
            evaluation.base_model,
            after.inference_time * 1000.0
        );
        if let Some(existing) = &evaluation.notes {
            notes = format!("{existing}. {notes}");
        }

        Ok(EvaluationUpdate::new()
            .status(RunStatus::Completed)
            .metrics(before, after)
            .notes(notes)
            .completed_at(Utc::now()))
    }
}

#[async_trait]
impl EvaluationLauncher for BackendEvaluator {
    async fn launch(&self, evaluation: &Evaluation) -> TrainingResult<()> {
        let evaluator = self.clone();
        let id = evaluation.id;
        info!(evaluation_id = %id, model = %evaluation.model_name, "Launching evaluation");
        self.tasks.spawn(async move {
            if let Err(e) = evaluator.run(id).await {
                error!(evaluation_id = %id, error = %e, "Evaluation could not be recorded");
            }
        });
        Ok(())
    }
}
