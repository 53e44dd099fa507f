//! Retry ledger.
//!
//! In-memory list of failed transfers the operator can retry in bulk. An
//! original attempt that fails appends an entry; a retry that fails again
//! only refreshes the stored error, so repeated retries never pile up
//! duplicates. A successful retry removes every entry for its target path.

use std::future::Future;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::media::MediaKind;
use crate::transfer::{SourceRef, TransferError, TransferTask};

/// A failed transfer kept for a later retry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryLedgerEntry {
    pub target_path: PathBuf,
    pub source: SourceRef,
    pub kind: MediaKind,
    pub label: String,
    pub byte_size: Option<u64>,
    pub last_error: String,
    pub failures: u32,
    pub recorded_at: DateTime<Utc>,
}

impl RetryLedgerEntry {
    /// Fresh retry task aimed at the same target path.
    pub fn retry_task(&self) -> TransferTask {
        let mut task = TransferTask::new(
            self.source.clone(),
            self.target_path.clone(),
            self.kind,
            self.label.clone(),
        )
        .as_retry();
        task.byte_size = self.byte_size;
        task
    }
}

/// Result of a bulk retry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryTally {
    pub succeeded: usize,
    pub still_failed: usize,
    /// `label: error` for each retry that failed again.
    pub errors: Vec<String>,
}

#[derive(Debug, Default)]
pub struct RetryLedger {
    entries: Mutex<Vec<RetryLedgerEntry>>,
}

impl RetryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a terminal failure.
    ///
    /// Original attempts append. Retries update the stored error of the
    /// existing entries for the same path and never add one.
    pub async fn record(&self, task: &TransferTask, error: &TransferError) {
        let mut entries = self.entries.lock().await;

        if task.is_retry {
            let mut updated = 0;
            for entry in entries.iter_mut().filter(|e| e.target_path == task.target_path) {
                entry.last_error = error.to_string();
                entry.failures += 1;
                entry.recorded_at = Utc::now();
                updated += 1;
            }
            debug!(
                path = %task.target_path.display(),
                updated,
                "Retry failed again, ledger updated"
            );
            return;
        }

        entries.push(RetryLedgerEntry {
            target_path: task.target_path.clone(),
            source: task.source.clone(),
            kind: task.kind,
            label: task.label.clone(),
            byte_size: task.byte_size,
            last_error: error.to_string(),
            failures: 1,
            recorded_at: Utc::now(),
        });
        info!(
            path = %task.target_path.display(),
            error_kind = %error.kind(),
            pending = entries.len(),
            "Recorded failed transfer"
        );
    }

    /// Remove every entry for `target_path`. Returns how many were removed.
    pub async fn clear_on_success(&self, target_path: &Path) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.target_path != target_path);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(path = %target_path.display(), removed, "Cleared ledger entries");
        }
        removed
    }

    pub async fn snapshot(&self) -> Vec<RetryLedgerEntry> {
        self.entries.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Retry every entry present when the drain starts.
    ///
    /// Entries recorded while the drain runs are left for the next one. The
    /// lock is not held across `retry`, so transfers may record freely.
    pub async fn drain_and_retry<F, Fut>(&self, mut retry: F) -> RetryTally
    where
        F: FnMut(TransferTask) -> Fut,
        Fut: Future<Output = Result<(), TransferError>>,
    {
        let snapshot = self.snapshot().await;
        let mut tally = RetryTally::default();
        info!(entries = snapshot.len(), "Retrying failed transfers");

        for entry in snapshot {
            let task = entry.retry_task();
            match retry(task.clone()).await {
                Ok(()) => {
                    self.clear_on_success(&entry.target_path).await;
                    tally.succeeded += 1;
                }
                Err(e) => {
                    self.record(&task, &e).await;
                    tally.still_failed += 1;
                    tally.errors.push(format!("{}: {}", entry.label, e.user_message()));
                }
            }
        }

        info!(
            succeeded = tally.succeeded,
            still_failed = tally.still_failed,
            "Retry drain finished"
        );
        tally
    }
}
