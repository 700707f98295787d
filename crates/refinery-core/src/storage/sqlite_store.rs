//! SQLite-backed `JobStore`.

use crate::storage::database::Database;
use crate::storage::error::{StorageError, StorageResult};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use refinery_training::{
    Dataset, DatasetId, Evaluation, EvaluationId, EvaluationUpdate, Job, JobId, JobStore,
    JobUpdate, NewDataset, NewEvaluation, NewJob, RunStatus, StoreResult,
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

const JOB_COLUMNS: &str = "id, name, version, job_type, base_model, target_name, config_json, \
     status, progress, resolved_artifact, error_message, created_at, started_at, completed_at";

const DATASET_COLUMNS: &str = "id, name, description, sample_count, metadata_json, created_at";

const EVALUATION_COLUMNS: &str = "id, job_id, model_name, base_model, dataset_id, kind, status, \
     before_metrics_json, after_metrics_json, improvement, notes, error_message, created_at, \
     started_at, completed_at";

// ============================================================================
// Row Parsing Helpers
// ============================================================================

fn invalid_column(idx: usize, column_name: &str) -> rusqlite::Error {
    rusqlite::Error::InvalidColumnType(idx, column_name.to_string(), rusqlite::types::Type::Text)
}

fn parse_json_field<T>(row: &Row, idx: usize, column_name: &str) -> rusqlite::Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let json_str: String = row.get(idx)?;
    serde_json::from_str(&json_str).map_err(|_| invalid_column(idx, column_name))
}

fn parse_optional_json_field<T>(
    row: &Row,
    idx: usize,
    column_name: &str,
) -> rusqlite::Result<Option<T>>
where
    T: serde::de::DeserializeOwned,
{
    let json_str: Option<String> = row.get(idx)?;
    json_str
        .map(|s| serde_json::from_str(&s).map_err(|_| invalid_column(idx, column_name)))
        .transpose()
}

fn parse_text<T: FromStr>(row: &Row, idx: usize, column_name: &str) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    text.parse().map_err(|_| invalid_column(idx, column_name))
}

fn parse_timestamp(row: &Row, idx: usize, column_name: &str) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| invalid_column(idx, column_name))
}

fn parse_optional_timestamp(
    row: &Row,
    idx: usize,
    column_name: &str,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| {
        DateTime::parse_from_rfc3339(&t)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|_| invalid_column(idx, column_name))
    })
    .transpose()
}

/// Fixed-width so that lexical order matches chronological order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn optional_timestamp(at: Option<DateTime<Utc>>) -> Option<String> {
    at.map(timestamp)
}

fn job_from_row(row: &Row) -> rusqlite::Result<Job> {
    Ok(Job {
        id: JobId(row.get(0)?),
        name: row.get(1)?,
        version: row.get(2)?,
        job_type: parse_text(row, 3, "job_type")?,
        base_model: row.get(4)?,
        target_name: row.get(5)?,
        config: parse_json_field(row, 6, "config_json")?,
        status: parse_text(row, 7, "status")?,
        progress: row.get(8)?,
        resolved_artifact: row.get(9)?,
        error_message: row.get(10)?,
        created_at: parse_timestamp(row, 11, "created_at")?,
        started_at: parse_optional_timestamp(row, 12, "started_at")?,
        completed_at: parse_optional_timestamp(row, 13, "completed_at")?,
    })
}

fn dataset_from_row(row: &Row) -> rusqlite::Result<Dataset> {
    Ok(Dataset {
        id: DatasetId(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        sample_count: row.get(3)?,
        metadata: parse_json_field(row, 4, "metadata_json")?,
        created_at: parse_timestamp(row, 5, "created_at")?,
    })
}

fn evaluation_from_row(row: &Row) -> rusqlite::Result<Evaluation> {
    Ok(Evaluation {
        id: EvaluationId(row.get(0)?),
        job_id: row.get::<_, Option<i64>>(1)?.map(JobId),
        model_name: row.get(2)?,
        base_model: row.get(3)?,
        dataset_id: row.get::<_, Option<i64>>(4)?.map(DatasetId),
        kind: parse_text(row, 5, "kind")?,
        status: parse_text(row, 6, "status")?,
        before_metrics: parse_optional_json_field(row, 7, "before_metrics_json")?,
        after_metrics: parse_optional_json_field(row, 8, "after_metrics_json")?,
        improvement: row.get(9)?,
        notes: row.get(10)?,
        error_message: row.get(11)?,
        created_at: parse_timestamp(row, 12, "created_at")?,
        started_at: parse_optional_timestamp(row, 13, "started_at")?,
        completed_at: parse_optional_timestamp(row, 14, "completed_at")?,
    })
}

fn select_job(conn: &Connection, id: JobId) -> StorageResult<Option<Job>> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id.0], job_from_row).optional()?)
}

fn select_evaluation(conn: &Connection, id: EvaluationId) -> StorageResult<Option<Evaluation>> {
    let sql = format!("SELECT {EVALUATION_COLUMNS} FROM evaluations WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id.0], evaluation_from_row).optional()?)
}

// ============================================================================
// SQLite Job Store
// ============================================================================

/// `JobStore` persisted in a single SQLite database.
///
/// Guarded updates run inside a transaction so the status check and the
/// write are atomic with respect to other writers on the same connection.
#[derive(Clone)]
pub struct SqliteJobStore {
    db: Arc<Mutex<Database>>,
}

impl std::fmt::Debug for SqliteJobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteJobStore").finish_non_exhaustive()
    }
}

impl SqliteJobStore {
    /// Wraps an open database.
    pub fn new(db: Database) -> Self {
        Self { db: Arc::new(Mutex::new(db)) }
    }

    /// Opens (or creates) the database file at `path`.
    ///
    /// # Errors
    /// * `StorageError::Connection` - If the database cannot be opened
    pub fn open(path: &Path) -> StorageResult<Self> {
        info!(path = %path.display(), "Opening job database");
        Ok(Self::new(Database::open(path)?))
    }

    /// Opens an in-memory database for testing.
    pub fn open_in_memory() -> StorageResult<Self> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|e| StorageError::InvalidData(format!("Database lock error: {}", e)))
    }

    fn insert_job(&self, job: NewJob) -> StorageResult<Job> {
        let db = self.lock()?;
        let created_at = Utc::now();
        let target_name = job.target_name();
        let config_json = serde_json::to_string(&job.config)?;
        db.conn().execute(
            "INSERT INTO jobs (name, version, job_type, base_model, target_name, config_json, status, progress, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
            params![
                job.name,
                job.version,
                job.job_type.as_str(),
                job.base_model,
                target_name,
                config_json,
                RunStatus::Pending.as_str(),
                timestamp(created_at)
            ],
        )?;
        let id = JobId(db.conn().last_insert_rowid());
        info!(job_id = %id, target = %target_name, "Created job");
        Ok(Job {
            id,
            name: job.name,
            version: job.version,
            job_type: job.job_type,
            base_model: job.base_model,
            target_name,
            config: job.config,
            status: RunStatus::Pending,
            progress: 0.0,
            resolved_artifact: None,
            error_message: None,
            created_at,
            started_at: None,
            completed_at: None,
        })
    }

    fn fetch_job(&self, id: JobId) -> StorageResult<Option<Job>> {
        let db = self.lock()?;
        select_job(db.conn(), id)
    }

    fn write_job_update(&self, id: JobId, update: &JobUpdate) -> StorageResult<bool> {
        let mut db = self.lock()?;
        let tx = db.conn_mut().transaction()?;
        let Some(mut job) = select_job(&tx, id)? else {
            return Ok(false);
        };
        if !update.apply_to(&mut job) {
            debug!(job_id = %id, status = %job.status, "Guarded update skipped");
            return Ok(false);
        }
        tx.execute(
            "UPDATE jobs SET status = ?2, progress = ?3, resolved_artifact = ?4, error_message = ?5, started_at = ?6, completed_at = ?7 WHERE id = ?1",
            params![
                id.0,
                job.status.as_str(),
                job.progress,
                job.resolved_artifact,
                job.error_message,
                optional_timestamp(job.started_at),
                optional_timestamp(job.completed_at)
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn remove_row(&self, table: &str, id: i64) -> StorageResult<bool> {
        let db = self.lock()?;
        let rows_affected =
            db.conn().execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])?;
        if rows_affected > 0 {
            info!(table, id, "Deleted record");
        }
        Ok(rows_affected > 0)
    }

    fn query_jobs(&self, status: Option<RunStatus>) -> StorageResult<Vec<Job>> {
        let db = self.lock()?;
        let jobs = if let Some(status) = status {
            let sql = format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ?1 ORDER BY created_at DESC, id DESC"
            );
            let mut stmt = db.conn().prepare(&sql)?;
            stmt.query_map(params![status.as_str()], job_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?
        } else {
            let sql = format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, id DESC");
            let mut stmt = db.conn().prepare(&sql)?;
            stmt.query_map([], job_from_row)?.collect::<std::result::Result<Vec<_>, _>>()?
        };
        Ok(jobs)
    }

    fn insert_dataset(&self, dataset: NewDataset) -> StorageResult<Dataset> {
        let db = self.lock()?;
        let created_at = Utc::now();
        let metadata = dataset.metadata();
        let sample_count = dataset.samples.len() as i64;
        db.conn().execute(
            "INSERT INTO datasets (name, description, sample_count, metadata_json, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                dataset.name,
                dataset.description,
                sample_count,
                serde_json::to_string(&metadata)?,
                timestamp(created_at)
            ],
        )?;
        let id = DatasetId(db.conn().last_insert_rowid());
        info!(dataset_id = %id, samples = sample_count, "Created dataset");
        Ok(Dataset {
            id,
            name: dataset.name,
            description: dataset.description,
            sample_count,
            metadata,
            created_at,
        })
    }

    fn fetch_dataset(&self, id: DatasetId) -> StorageResult<Option<Dataset>> {
        let db = self.lock()?;
        let sql = format!("SELECT {DATASET_COLUMNS} FROM datasets WHERE id = ?1");
        Ok(db.conn().query_row(&sql, params![id.0], dataset_from_row).optional()?)
    }

    fn query_datasets(&self) -> StorageResult<Vec<Dataset>> {
        let db = self.lock()?;
        let sql = format!("SELECT {DATASET_COLUMNS} FROM datasets ORDER BY id");
        let mut stmt = db.conn().prepare(&sql)?;
        let datasets =
            stmt.query_map([], dataset_from_row)?.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(datasets)
    }

    fn insert_evaluation(&self, evaluation: NewEvaluation) -> StorageResult<Evaluation> {
        let db = self.lock()?;
        let created_at = Utc::now();
        db.conn().execute(
            "INSERT INTO evaluations (job_id, model_name, base_model, dataset_id, kind, status, notes, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                evaluation.job_id.map(|id| id.0),
                evaluation.model_name,
                evaluation.base_model,
                evaluation.dataset_id.map(|id| id.0),
                evaluation.kind.as_str(),
                RunStatus::Pending.as_str(),
                evaluation.notes,
                timestamp(created_at)
            ],
        )?;
        let id = EvaluationId(db.conn().last_insert_rowid());
        info!(evaluation_id = %id, model = %evaluation.model_name, "Created evaluation");
        Ok(Evaluation {
            id,
            job_id: evaluation.job_id,
            model_name: evaluation.model_name,
            base_model: evaluation.base_model,
            dataset_id: evaluation.dataset_id,
            kind: evaluation.kind,
            status: RunStatus::Pending,
            before_metrics: None,
            after_metrics: None,
            improvement: None,
            notes: evaluation.notes,
            error_message: None,
            created_at,
            started_at: None,
            completed_at: None,
        })
    }

    fn fetch_evaluation(&self, id: EvaluationId) -> StorageResult<Option<Evaluation>> {
        let db = self.lock()?;
        select_evaluation(db.conn(), id)
    }

    fn write_evaluation_update(
        &self,
        id: EvaluationId,
        update: &EvaluationUpdate,
    ) -> StorageResult<bool> {
        let mut db = self.lock()?;
        let tx = db.conn_mut().transaction()?;
        let Some(mut evaluation) = select_evaluation(&tx, id)? else {
            return Ok(false);
        };
        update.apply_to(&mut evaluation);
        let before = evaluation.before_metrics.as_ref().map(serde_json::to_string).transpose()?;
        let after = evaluation.after_metrics.as_ref().map(serde_json::to_string).transpose()?;
        tx.execute(
            "UPDATE evaluations SET status = ?2, before_metrics_json = ?3, after_metrics_json = ?4, improvement = ?5, notes = ?6, error_message = ?7, started_at = ?8, completed_at = ?9 WHERE id = ?1",
            params![
                id.0,
                evaluation.status.as_str(),
                before,
                after,
                evaluation.improvement,
                evaluation.notes,
                evaluation.error_message,
                optional_timestamp(evaluation.started_at),
                optional_timestamp(evaluation.completed_at)
            ],
        )?;
        tx.commit()?;
        Ok(true)
    }

    fn query_evaluations(&self) -> StorageResult<Vec<Evaluation>> {
        let db = self.lock()?;
        let sql = format!(
            "SELECT {EVALUATION_COLUMNS} FROM evaluations ORDER BY created_at DESC, id DESC"
        );
        let mut stmt = db.conn().prepare(&sql)?;
        let evaluations =
            stmt.query_map([], evaluation_from_row)?.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(evaluations)
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create_job(&self, job: NewJob) -> StoreResult<Job> {
        Ok(self.insert_job(job)?)
    }

    async fn get_job(&self, id: JobId) -> StoreResult<Option<Job>> {
        Ok(self.fetch_job(id)?)
    }

    async fn update_job(&self, id: JobId, update: &JobUpdate) -> StoreResult<bool> {
        Ok(self.write_job_update(id, update)?)
    }

    async fn delete_job(&self, id: JobId) -> StoreResult<bool> {
        Ok(self.remove_row("jobs", id.0)?)
    }

    async fn list_jobs(&self) -> StoreResult<Vec<Job>> {
        Ok(self.query_jobs(None)?)
    }

    async fn list_jobs_with_status(&self, status: RunStatus) -> StoreResult<Vec<Job>> {
        Ok(self.query_jobs(Some(status))?)
    }

    async fn create_dataset(&self, dataset: NewDataset) -> StoreResult<Dataset> {
        Ok(self.insert_dataset(dataset)?)
    }

    async fn get_dataset(&self, id: DatasetId) -> StoreResult<Option<Dataset>> {
        Ok(self.fetch_dataset(id)?)
    }

    async fn list_datasets(&self) -> StoreResult<Vec<Dataset>> {
        Ok(self.query_datasets()?)
    }

    async fn delete_dataset(&self, id: DatasetId) -> StoreResult<bool> {
        Ok(self.remove_row("datasets", id.0)?)
    }

    async fn create_evaluation(&self, evaluation: NewEvaluation) -> StoreResult<Evaluation> {
        Ok(self.insert_evaluation(evaluation)?)
    }

    async fn get_evaluation(&self, id: EvaluationId) -> StoreResult<Option<Evaluation>> {
        Ok(self.fetch_evaluation(id)?)
    }

    async fn update_evaluation(
        &self,
        id: EvaluationId,
        update: &EvaluationUpdate,
    ) -> StoreResult<bool> {
        Ok(self.write_evaluation_update(id, update)?)
    }

    async fn list_evaluations(&self) -> StoreResult<Vec<Evaluation>> {
        Ok(self.query_evaluations()?)
    }

    async fn delete_evaluation(&self, id: EvaluationId) -> StoreResult<bool> {
        Ok(self.remove_row("evaluations", id.0)?)
    }
}
