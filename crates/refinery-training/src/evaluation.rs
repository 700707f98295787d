use crate::error::{TrainingError, TrainingResult};
use crate::job::{DatasetId, EvaluationId, JobId, RunStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluationKind {
    Accuracy,
}

impl EvaluationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accuracy => "accuracy",
        }
    }
}

impl fmt::Display for EvaluationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvaluationKind {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accuracy" => Ok(Self::Accuracy),
            other => Err(TrainingError::InvalidSpec(format!("unknown evaluation kind: {other}"))),
        }
    }
}

/// Scores for one side of a before/after comparison.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationMetrics {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Mean response latency in seconds.
    pub inference_time: f64,
    pub samples: usize,
}

/// Before/after comparison of a customized artifact against its base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: EvaluationId,
    /// Job that produced the evaluated artifact, when chained from a job.
    pub job_id: Option<JobId>,
    pub model_name: String,
    pub base_model: String,
    pub dataset_id: Option<DatasetId>,
    pub kind: EvaluationKind,
    pub status: RunStatus,
    pub before_metrics: Option<EvaluationMetrics>,
    pub after_metrics: Option<EvaluationMetrics>,
    pub improvement: Option<f64>,
    pub notes: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvaluation {
    pub job_id: Option<JobId>,
    pub model_name: String,
    pub base_model: String,
    pub dataset_id: Option<DatasetId>,
    pub kind: EvaluationKind,
    pub notes: Option<String>,
}

/// Partial update to an evaluation record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationUpdate {
    pub status: Option<RunStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub before_metrics: Option<EvaluationMetrics>,
    pub after_metrics: Option<EvaluationMetrics>,
    pub improvement: Option<f64>,
    pub notes: Option<String>,
    pub error_message: Option<String>,
}

impl EvaluationUpdate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    #[must_use]
    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    #[must_use]
    pub fn metrics(mut self, before: EvaluationMetrics, after: EvaluationMetrics) -> Self {
        self.improvement = Some(after.accuracy - before.accuracy);
        self.before_metrics = Some(before);
        self.after_metrics = Some(after);
        self
    }

    #[must_use]
    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    #[must_use]
    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn apply_to(&self, evaluation: &mut Evaluation) {
        if let Some(status) = self.status {
            evaluation.status = status;
        }
        if let Some(at) = self.started_at {
            evaluation.started_at = Some(at);
        }
        if let Some(at) = self.completed_at {
            evaluation.completed_at = Some(at);
        }
        if let Some(metrics) = &self.before_metrics {
            evaluation.before_metrics = Some(metrics.clone());
        }
        if let Some(metrics) = &self.after_metrics {
            evaluation.after_metrics = Some(metrics.clone());
        }
        if let Some(improvement) = self.improvement {
            evaluation.improvement = Some(improvement);
        }
        if let Some(notes) = &self.notes {
            evaluation.notes = Some(notes.clone());
        }
        if let Some(message) = &self.error_message {
            evaluation.error_message = Some(message.clone());
        }
    }
}

/// Start operation of the evaluation subsystem.
#[async_trait]
pub trait EvaluationLauncher: Send + Sync {
    /// Starts running a persisted evaluation. Implementations own the
    /// evaluation's status from here on.
    async fn launch(&self, evaluation: &Evaluation) -> TrainingResult<()>;
}
