use crate::error::{TrainingError, TrainingResult};
use crate::naming::derive_target_name;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! record_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }
    };
}

record_id!(
    /// Identifier for a job, assigned by the store.
    JobId
);
record_id!(
    /// Identifier for a dataset record.
    DatasetId
);
record_id!(
    /// Identifier for an evaluation record.
    EvaluationId
);

/// Kind of customization a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    /// Fine-tune a low-rank adapter on the selected datasets.
    AdapterTuning,
    /// Package the base model with a retrieval collection built from the datasets.
    KnowledgeAugmentation,
}

impl JobType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AdapterTuning => "adapter_tuning",
            Self::KnowledgeAugmentation => "knowledge_augmentation",
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobType {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "adapter_tuning" | "adapter" | "lora" => Ok(Self::AdapterTuning),
            "knowledge_augmentation" | "knowledge" | "rag" => Ok(Self::KnowledgeAugmentation),
            other => Err(TrainingError::InvalidSpec(format!("unknown job type: {other}"))),
        }
    }
}

/// Lifecycle status shared by jobs and evaluations.
///
/// Transitions are one-directional: `Pending -> Running -> {Completed | Failed | Stopped}`.
/// A pending job may also go straight to `Failed` (scheduling failure) or `Stopped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl RunStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Stopped => "STOPPED",
        }
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }

    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Pending => matches!(next, Self::Running | Self::Failed | Self::Stopped),
            Self::Running => next.is_terminal(),
            Self::Completed | Self::Failed | Self::Stopped => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Ok(Self::Pending),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "STOPPED" => Ok(Self::Stopped),
            other => Err(TrainingError::InvalidSpec(format!("unknown status: {other}"))),
        }
    }
}

/// A persisted customization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    pub job_type: JobType,
    pub base_model: String,
    /// Name derived from `name` and `version` at creation time.
    pub target_name: String,
    /// Opaque configuration blob, parsed on demand with [`Job::job_config`].
    pub config: serde_json::Value,
    pub status: RunStatus,
    pub progress: f64,
    /// Name the backend registered; only set on `Completed`.
    pub resolved_artifact: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn job_config(&self) -> TrainingResult<JobConfig> {
        JobConfig::from_value(&self.config)
    }

    /// Time spent since the job started, if it has started.
    #[must_use]
    pub fn elapsed_since_start(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.started_at.map(|started| now - started)
    }
}

/// Input for creating a job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    pub job_type: JobType,
    pub base_model: String,
    #[serde(default = "empty_object")]
    pub config: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl NewJob {
    #[must_use]
    pub fn new(name: impl Into<String>, job_type: JobType, base_model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            job_type,
            base_model: base_model.into(),
            config: empty_object(),
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn target_name(&self) -> String {
        derive_target_name(&self.name, self.version.as_deref())
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.name.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("name is required".to_string()));
        }
        if self.base_model.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("base_model is required".to_string()));
        }
        if !self.config.is_object() {
            return Err(TrainingError::InvalidSpec("config must be a JSON object".to_string()));
        }
        JobConfig::from_value(&self.config)?.hyperparameters.validate()?;
        Ok(())
    }
}

/// Partial update to a job record. Every field is applied independently.
///
/// `expect_status` turns the update into a compare-and-set: the store applies it
/// only when the persisted status still matches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<RunStatus>,
    pub progress: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub resolved_artifact: Option<String>,
    pub expect_status: Option<RunStatus>,
}

impl JobUpdate {
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
    pub fn progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress.clamp(0.0, 1.0));
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
    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    #[must_use]
    pub fn resolved_artifact(mut self, name: impl Into<String>) -> Self {
        self.resolved_artifact = Some(name.into());
        self
    }

    #[must_use]
    pub fn when_status(mut self, status: RunStatus) -> Self {
        self.expect_status = Some(status);
        self
    }

    /// Applies the update to an in-memory record. Returns `false`, leaving the
    /// record untouched, when the status guard does not match or the status
    /// change is not allowed by [`RunStatus::can_transition_to`].
    pub fn apply_to(&self, job: &mut Job) -> bool {
        if let Some(expected) = self.expect_status
            && job.status != expected
        {
            return false;
        }
        if let Some(next) = self.status
            && !job.status.can_transition_to(next)
        {
            return false;
        }
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(progress) = self.progress {
            job.progress = progress;
        }
        if let Some(at) = self.started_at {
            job.started_at = Some(at);
        }
        if let Some(at) = self.completed_at {
            job.completed_at = Some(at);
        }
        if let Some(message) = &self.error_message {
            job.error_message = Some(message.clone());
        }
        if let Some(name) = &self.resolved_artifact {
            job.resolved_artifact = Some(name.clone());
        }
        true
    }
}

/// Hyperparameters forwarded to the adapter trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperParameters {
    pub epochs: u32,
    pub learning_rate: f64,
    pub batch_size: u32,
    pub lora_rank: u32,
}

impl Default for HyperParameters {
    fn default() -> Self {
        Self { epochs: 3, learning_rate: 2e-4, batch_size: 4, lora_rank: 16 }
    }
}

impl HyperParameters {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.epochs == 0 {
            return Err(TrainingError::InvalidSpec("epochs must be >= 1".to_string()));
        }
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(TrainingError::InvalidSpec("learning_rate must be > 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidSpec("batch_size must be >= 1".to_string()));
        }
        if self.lora_rank == 0 {
            return Err(TrainingError::InvalidSpec("lora_rank must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// Typed view over a job's configuration blob.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobConfig {
    #[serde(default, alias = "selected_datasets", deserialize_with = "dataset_ids")]
    pub selected_datasets: Vec<DatasetId>,
    #[serde(default, alias = "role_definition")]
    pub role_definition: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default, alias = "top_p")]
    pub top_p: Option<f64>,
    #[serde(default, alias = "context_length")]
    pub context_length: Option<u32>,
    #[serde(flatten)]
    pub hyperparameters: HyperParameters,
}

impl JobConfig {
    pub fn from_value(value: &serde_json::Value) -> TrainingResult<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
            .map_err(|e| TrainingError::InvalidSpec(format!("invalid job config: {e}")))
    }
}

fn dataset_ids<'de, D>(deserializer: D) -> Result<Vec<DatasetId>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Number(i64),
        Text(String),
    }

    let raw: Option<Vec<RawId>> = Option::deserialize(deserializer)?;
    raw.unwrap_or_default()
        .into_iter()
        .map(|id| match id {
            RawId::Number(n) => Ok(DatasetId(n)),
            RawId::Text(s) => s
                .trim()
                .parse::<i64>()
                .map(DatasetId)
                .map_err(|_| serde::de::Error::custom(format!("invalid dataset id: {s}"))),
        })
        .collect()
}
