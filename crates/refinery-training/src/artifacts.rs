use crate::error::{TrainingError, TrainingResult};
use crate::job::{DatasetId, JobId, JobType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    TrainSplit,
    ValidationSplit,
    Adapter,
    BehaviorSpec,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    /// Empty for directories.
    pub sha256: String,
}

/// Summary written next to a job's training data once it completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobManifest {
    pub job_id: JobId,
    pub job_type: JobType,
    pub created_at: DateTime<Utc>,
    pub base_model: String,
    pub resolved_artifact: String,
    pub datasets: Vec<DatasetId>,
    pub artifacts: Vec<JobArtifact>,
}

impl JobManifest {
    pub fn write(&self, path: &Path) -> TrainingResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

pub fn make_artifact(kind: ArtifactKind, path: PathBuf) -> TrainingResult<JobArtifact> {
    if !path.exists() {
        return Err(TrainingError::Artifact(format!(
            "artifact path does not exist: {}",
            path.display()
        )));
    }

    let sha256 = if path.is_file() { sha256_file(&path)? } else { String::new() };
    Ok(JobArtifact { kind, path, sha256 })
}

/// Writes one JSON document per line, creating parent directories.
pub fn write_jsonl<T: Serialize>(path: &Path, items: &[T]) -> TrainingResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::io::BufWriter::new(std::fs::File::create(path)?);
    for item in items {
        serde_json::to_writer(&mut file, item)?;
        file.write_all(b"\n")?;
    }
    file.flush()?;
    Ok(())
}
