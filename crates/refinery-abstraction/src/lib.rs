//! Collaborator abstraction layer for Refinery.
//!
//! This crate defines the narrow traits the job engine consumes from the
//! outside world: a model backend that materializes and serves artifacts, and
//! a knowledge store that holds named retrieval collections.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;
use thiserror::Error;

/// Represents an error raised by an external collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendError {
    /// An external command exited unsuccessfully.
    #[error("Command `{command}` failed ({status}): {stderr}")]
    CommandFailed {
        /// The command line that was executed.
        command: String,
        /// Exit status description.
        status: String,
        /// Captured standard error.
        stderr: String,
    },

    /// An operation did not finish within its allotted time.
    #[error("Timed out after {seconds}s: {operation}")]
    Timeout {
        /// What was being attempted.
        operation: String,
        /// Timeout in seconds.
        seconds: u64,
    },

    /// A request to a remote service failed.
    #[error("Request Error: {0}")]
    Request(String),

    /// A filesystem operation failed.
    #[error("I/O Error: {0}")]
    Io(String),

    /// Serialization or deserialization failed.
    #[error("Serialization Error: {0}")]
    Serialization(String),

    /// Other unexpected errors.
    #[error("Backend Error: {0}")]
    Other(String),
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Result type alias for collaborator operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Build specification for a deployable artifact.
///
/// Renders to the backend's behavior-spec format (`FROM`, optional `ADAPTER`,
/// `SYSTEM` and `PARAMETER` lines).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSpec {
    /// Name the artifact should be created under (e.g. `my-model:1.0`).
    pub name: String,
    /// Base artifact the new one derives from.
    pub base: String,
    /// Optional adapter weights directory layered on top of the base.
    pub adapter: Option<PathBuf>,
    /// System prompt baked into the artifact.
    pub system_prompt: String,
    /// Ordered runtime parameters.
    pub parameters: Vec<(String, String)>,
    /// Directory holding the rendered spec and any companion files.
    pub directory: PathBuf,
}

impl ArtifactSpec {
    /// File name of the rendered behavior spec inside `directory`.
    pub const SPEC_FILE_NAME: &'static str = "Modelfile";

    /// Path of the rendered behavior spec.
    #[must_use]
    pub fn spec_path(&self) -> PathBuf {
        self.directory.join(Self::SPEC_FILE_NAME)
    }

    /// Renders the spec in the backend's text format.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = format!("FROM {}\n", self.base);
        if let Some(adapter) = &self.adapter {
            let _ = writeln!(out, "ADAPTER {}", adapter.display());
        }
        out.push('\n');
        let _ = writeln!(out, "SYSTEM \"{}\"", self.system_prompt.replace('"', "\\\""));
        for (key, value) in &self.parameters {
            let _ = writeln!(out, "PARAMETER {key} {value}");
        }
        out
    }
}

/// A single document stored in a knowledge collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeRecord {
    /// Text used for retrieval.
    pub context: String,
    /// Text the model should ground its answer on.
    pub response: String,
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub system: String,
    /// Name of the dataset the record came from.
    pub source: String,
    /// Dataset identifier.
    pub dataset_id: i64,
}

/// A backend capable of building, removing and querying model artifacts.
///
/// All backends must be `Send + Sync` to allow concurrent use across jobs.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Returns a short identifier for logs (e.g. `ollama`).
    fn id(&self) -> &'static str;

    /// Materializes an artifact from `spec`.
    ///
    /// # Returns
    /// The name the backend actually registered, which may differ from
    /// `spec.name`.
    async fn build(&self, spec: &ArtifactSpec) -> BackendResult<String>;

    /// Removes an artifact. Returns `false` if it did not exist.
    async fn remove(&self, name: &str) -> BackendResult<bool>;

    /// Sends a prompt to an artifact and returns its text response.
    async fn query(&self, name: &str, prompt: &str) -> BackendResult<String>;

    /// Checks whether an artifact is known to the backend.
    async fn exists(&self, name: &str) -> BackendResult<bool>;
}

/// A store of named retrieval collections.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Ingests `records` into `collection`, creating it if necessary.
    async fn ingest(&self, collection: &str, records: &[KnowledgeRecord]) -> BackendResult<bool>;

    /// Returns up to `limit` records most relevant to `text`.
    async fn query(
        &self,
        collection: &str,
        text: &str,
        limit: usize,
    ) -> BackendResult<Vec<KnowledgeRecord>>;

    /// Deletes a collection. Returns `false` if it did not exist.
    async fn delete(&self, collection: &str) -> BackendResult<bool>;
}
