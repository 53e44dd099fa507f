//! JSON-lines log of failed sync runs.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::warn;

use super::SyncError;

/// One failed sync of a folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub folder: PathBuf,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl FailureRecord {
    pub fn new(folder: &Path, error: impl Into<String>) -> Self {
        Self {
            folder: folder.to_path_buf(),
            error: error.into(),
            failed_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FailureLog {
    path: PathBuf,
}

impl FailureLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, record: &FailureRecord) -> Result<(), SyncError> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// All readable records. A missing log is empty; bad lines are skipped.
    pub async fn read(&self) -> Result<Vec<FailureRecord>, SyncError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut records = Vec::new();
        for (lineno, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = lineno + 1,
                    error = %e,
                    "Skipping malformed sync failure record"
                ),
            }
        }
        Ok(records)
    }

    /// Replace the log with `records`, deleting it when there are none.
    pub async fn rewrite(&self, records: &[FailureRecord]) -> Result<(), SyncError> {
        if records.is_empty() {
            return match fs::remove_file(&self.path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            };
        }

        let mut contents = String::new();
        for record in records {
            contents.push_str(&serde_json::to_string(record)?);
            contents.push('\n');
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        fs::write(&tmp, contents).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn append_then_read() {
        let dir = TempDir::new().unwrap();
        let log = FailureLog::new(dir.path().join("failures.jsonl"));

        log.append(&FailureRecord::new(Path::new("/a"), "exit 1")).await.unwrap();
        log.append(&FailureRecord::new(Path::new("/b"), "exit 2")).await.unwrap();

        let records = log.read().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].folder, PathBuf::from("/a"));
        assert_eq!(records[1].error, "exit 2");
    }

    #[tokio::test]
    async fn missing_log_reads_empty() {
        let dir = TempDir::new().unwrap();
        let log = FailureLog::new(dir.path().join("nope.jsonl"));
        assert!(log.read().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("failures.jsonl");
        let good = serde_json::to_string(&FailureRecord::new(Path::new("/a"), "x")).unwrap();
        fs::write(&path, format!("not json\n{}\n\n", good)).await.unwrap();

        let records = FailureLog::new(&path).read().await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn rewrite_replaces_or_removes() {
        let dir = TempDir::new().unwrap();
        let log = FailureLog::new(dir.path().join("failures.jsonl"));
        log.append(&FailureRecord::new(Path::new("/a"), "x")).await.unwrap();
        log.append(&FailureRecord::new(Path::new("/b"), "y")).await.unwrap();

        log.rewrite(&[FailureRecord::new(Path::new("/b"), "z")])
            .await
            .unwrap();
        let records = log.read().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error, "z");

        log.rewrite(&[]).await.unwrap();
        assert!(!log.path().exists());
    }
}
