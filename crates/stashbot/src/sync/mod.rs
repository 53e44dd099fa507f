//! Cloud sync through an external command-line tool.
//!
//! The tool is invoked as
//! `<binary> copy <folder> <remote> --transfers=N --chunk-size=S --rate-limit=R`.
//! Exit code 0 is success; anything else is a failure carrying the captured
//! stderr. Failed runs are appended to a JSON-lines log so they can be
//! replayed later with [`SyncRunner::retry_failed`].

mod failures;

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::fs;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::ledger::RetryTally;

pub use failures::{FailureLog, FailureRecord};

/// Longest stderr excerpt kept in errors and the failure log.
const MAX_STDERR_CHARS: usize = 2000;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to start sync tool {binary}: {source}")]
    Spawn {
        binary: String,
        source: std::io::Error,
    },

    #[error("sync tool exited with {}: {stderr}", exit_label(.code))]
    Failed { code: Option<i32>, stderr: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failure log error: {0}")]
    Json(#[from] serde_json::Error),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

/// Outcome of a successful sync.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncReport {
    pub folder: PathBuf,
    pub files_removed: usize,
    pub elapsed: Duration,
}

pub struct SyncRunner {
    config: SyncConfig,
    failures: FailureLog,
}

impl SyncRunner {
    pub fn new(config: SyncConfig, failure_log: impl Into<PathBuf>) -> Self {
        Self {
            config,
            failures: FailureLog::new(failure_log),
        }
    }

    pub fn failure_log(&self) -> &FailureLog {
        &self.failures
    }

    pub fn build_args(&self, folder: &Path) -> Vec<String> {
        vec![
            "copy".to_string(),
            folder.display().to_string(),
            self.config.remote_target.clone(),
            format!("--transfers={}", self.config.transfers),
            format!("--chunk-size={}", self.config.chunk_size),
            format!("--rate-limit={}", self.config.rate_limit),
        ]
    }

    /// Sync `folder`. Failures are logged for a later retry.
    pub async fn run(&self, folder: &Path) -> Result<SyncReport, SyncError> {
        match self.sync_once(folder).await {
            Ok(report) => Ok(report),
            Err(e) => {
                let record = FailureRecord::new(folder, e.to_string());
                if let Err(log_err) = self.failures.append(&record).await {
                    warn!(error = %log_err, "Failed to record sync failure");
                }
                Err(e)
            }
        }
    }

    /// Replay every folder in the failure log.
    ///
    /// The log is rewritten with the folders that still fail, or removed
    /// when all of them succeed.
    pub async fn retry_failed(&self) -> Result<RetryTally, SyncError> {
        let records = self.failures.read().await?;
        let mut folders: Vec<PathBuf> = Vec::new();
        for record in &records {
            if !folders.contains(&record.folder) {
                folders.push(record.folder.clone());
            }
        }

        let mut tally = RetryTally::default();
        let mut still_failing = Vec::new();
        for folder in folders {
            match self.sync_once(&folder).await {
                Ok(_) => tally.succeeded += 1,
                Err(e) => {
                    tally.still_failed += 1;
                    tally.errors.push(format!("{}: {}", folder.display(), e));
                    still_failing.push(FailureRecord::new(&folder, e.to_string()));
                }
            }
        }

        self.failures.rewrite(&still_failing).await?;
        info!(
            succeeded = tally.succeeded,
            still_failed = tally.still_failed,
            "Sync retry finished"
        );
        Ok(tally)
    }

    async fn sync_once(&self, folder: &Path) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        // Files that land while the tool runs are not part of this upload.
        let uploaded = self.local_files(folder).await?;
        self.invoke(folder).await?;

        let files_removed = if self.config.cleanup_after_sync {
            self.cleanup(&uploaded).await
        } else {
            0
        };

        let elapsed = started.elapsed();
        info!(
            folder = %folder.display(),
            files_removed,
            elapsed_ms = elapsed.as_millis() as u64,
            "Sync complete"
        );
        Ok(SyncReport {
            folder: folder.to_path_buf(),
            files_removed,
            elapsed,
        })
    }

    async fn invoke(&self, folder: &Path) -> Result<(), SyncError> {
        let args = self.build_args(folder);
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // SAFETY: pre_exec runs in the forked child before exec. PR_SET_PDEATHSIG
        // makes the tool receive SIGTERM if the bot dies mid-sync. Nothing shared
        // is touched in the callback.
        #[cfg(target_os = "linux")]
        unsafe {
            cmd.pre_exec(|| {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        debug!(binary = %self.config.binary.display(), args = ?args, "Starting sync tool");
        let output = cmd.output().await.map_err(|source| SyncError::Spawn {
            binary: self.config.binary.display().to_string(),
            source,
        })?;

        if output.status.success() {
            return Ok(());
        }

        let stderr: String = String::from_utf8_lossy(&output.stderr)
            .trim()
            .chars()
            .take(MAX_STDERR_CHARS)
            .collect();
        warn!(
            folder = %folder.display(),
            code = ?output.status.code(),
            "Sync tool failed"
        );
        Err(SyncError::Failed {
            code: output.status.code(),
            stderr,
        })
    }

    /// Regular files directly under `folder`, minus the failure log.
    async fn local_files(&self, folder: &Path) -> Result<Vec<PathBuf>, SyncError> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(folder).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if entry.file_type().await?.is_file() && !self.is_failure_log(&path) {
                files.push(path);
            }
        }
        Ok(files)
    }

    /// Delete the files the sync tool was handed.
    async fn cleanup(&self, uploaded: &[PathBuf]) -> usize {
        let mut removed = 0;
        for path in uploaded {
            match fs::remove_file(path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove synced file"),
            }
        }
        removed
    }

    fn is_failure_log(&self, path: &Path) -> bool {
        path.file_name().is_some() && path.file_name() == self.failures.path().file_name()
    }
}
