//! Directory-backed knowledge store.
//!
//! Each collection is a directory holding a `records.jsonl` file. Queries
//! rank records by how many query terms they contain.

use async_trait::async_trait;
use refinery_abstraction::{BackendError, BackendResult, KnowledgeRecord, KnowledgeStore};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const RECORDS_FILE: &str = "records.jsonl";

#[derive(Debug, Clone)]
pub struct FileKnowledgeStore {
    root: PathBuf,
}

impl FileKnowledgeStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_dir(&self, collection: &str) -> BackendResult<PathBuf> {
        let valid = !collection.is_empty()
            && collection.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && collection != "."
            && collection != "..";
        if !valid {
            return Err(BackendError::Other(format!("Invalid collection name '{collection}'")));
        }
        Ok(self.root.join(collection))
    }

    async fn load(&self, collection: &str) -> BackendResult<Option<Vec<KnowledgeRecord>>> {
        let path = self.collection_dir(collection)?.join(RECORDS_FILE);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let records = content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(serde_json::from_str)
            .collect::<Result<Vec<KnowledgeRecord>, _>>()?;
        Ok(Some(records))
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|term| term.chars().count() > 2)
        .map(str::to_lowercase)
        .collect()
}

fn score(record: &KnowledgeRecord, query_terms: &HashSet<String>) -> usize {
    let haystack = terms(&format!("{} {}", record.context, record.response));
    query_terms.intersection(&haystack).count()
}

#[async_trait]
impl KnowledgeStore for FileKnowledgeStore {
    async fn ingest(&self, collection: &str, records: &[KnowledgeRecord]) -> BackendResult<bool> {
        if records.is_empty() {
            return Ok(false);
        }
        let dir = self.collection_dir(collection)?;
        tokio::fs::create_dir_all(&dir).await?;

        let mut buffer = String::new();
        for record in records {
            buffer.push_str(&serde_json::to_string(record)?);
            buffer.push('\n');
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(RECORDS_FILE))
            .await?;
        file.write_all(buffer.as_bytes()).await?;
        file.flush().await?;

        info!(collection, records = records.len(), "Ingested knowledge records");
        Ok(true)
    }

    async fn query(
        &self,
        collection: &str,
        text: &str,
        limit: usize,
    ) -> BackendResult<Vec<KnowledgeRecord>> {
        let Some(records) = self.load(collection).await? else {
            return Ok(Vec::new());
        };
        let query_terms = terms(text);
        let mut scored: Vec<(usize, KnowledgeRecord)> = records
            .into_iter()
            .map(|record| (score(&record, &query_terms), record))
            .filter(|(score, _)| *score > 0)
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        debug!(collection, matches = scored.len(), "Knowledge query");
        Ok(scored.into_iter().take(limit).map(|(_, record)| record).collect())
    }

    async fn delete(&self, collection: &str) -> BackendResult<bool> {
        let dir = self.collection_dir(collection)?;
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => {
                info!(collection, "Deleted knowledge collection");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(context: &str, response: &str) -> KnowledgeRecord {
        KnowledgeRecord {
            context: context.to_string(),
            response: response.to_string(),
            instruction: context.to_string(),
            input: String::new(),
            system: String::new(),
            source: "faq".to_string(),
            dataset_id: 1,
        }
    }

    #[tokio::test]
    async fn test_ingest_query_delete() {
        let temp = TempDir::new().unwrap();
        let store = FileKnowledgeStore::new(temp.path());
        let records = vec![
            record("Instruction: What is the capital of France?", "Paris"),
            record("Instruction: How many legs does a spider have?", "Eight"),
        ];

        assert!(store.ingest("knowledge_base_job_1", &records).await.unwrap());
        let hits = store.query("knowledge_base_job_1", "capital of france", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].response, "Paris");

        assert!(store.delete("knowledge_base_job_1").await.unwrap());
        assert!(!store.delete("knowledge_base_job_1").await.unwrap());
        assert!(store.query("knowledge_base_job_1", "capital", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ingest_appends() {
        let temp = TempDir::new().unwrap();
        let store = FileKnowledgeStore::new(temp.path());
        store.ingest("c", &[record("alpha beta gamma", "one")]).await.unwrap();
        store.ingest("c", &[record("alpha delta", "two")]).await.unwrap();

        let hits = store.query("c", "alpha gamma", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].response, "one");
    }

    #[tokio::test]
    async fn test_empty_ingest_returns_false() {
        let temp = TempDir::new().unwrap();
        let store = FileKnowledgeStore::new(temp.path());
        assert!(!store.ingest("c", &[]).await.unwrap());
    }

    #[tokio::test]
    async fn test_rejects_path_like_collection_names() {
        let temp = TempDir::new().unwrap();
        let store = FileKnowledgeStore::new(temp.path());
        assert!(store.delete("../outside").await.is_err());
        assert!(store.ingest("a/b", &[record("x", "y")]).await.is_err());
    }
}
