//! Byte transfers from the chat platform or the web into local storage.
//!
//! A [`TransferTask`] is created per media item or URL and handed to the
//! [`TransferExecutor`], which owns it until the transfer ends. Task status
//! only moves forward: pending, in progress, then completed or failed.

mod error;
mod executor;
mod progress;
mod verify;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;
use url::Url;

use crate::config::DownloadConfig;
use crate::media::{MediaDescriptor, MediaKind, sanitize_file_name, unique_target_path};

pub use error::{ErrorKind, TransferError};
pub use executor::TransferExecutor;
pub use progress::{NoProgress, ProgressEmitter, ProgressSink, ProgressUpdate};
pub use verify::verify_file;

// ============================================================================
// Settings
// ============================================================================

/// Runtime limits for transfers, converted once from [`DownloadConfig`].
#[derive(Debug, Clone)]
pub struct TransferSettings {
    pub max_bytes: u64,
    pub chunk_size: usize,
    pub max_attempts: u32,
    /// Base of the linear backoff between attempts.
    pub retry_delay: Duration,
    /// Wall-clock budget for all attempts together. `None` means unbounded.
    pub timeout: Option<Duration>,
    pub progress_interval: Duration,
}

impl TransferSettings {
    pub fn from_config(config: &DownloadConfig) -> Self {
        Self {
            max_bytes: config.max_file_size_bytes(),
            chunk_size: config.chunk_size_bytes.max(4096),
            max_attempts: config.max_attempts.max(1),
            retry_delay: Duration::from_secs(config.retry_delay_seconds),
            timeout: (config.timeout_seconds > 0)
                .then(|| Duration::from_secs(config.timeout_seconds)),
            progress_interval: Duration::from_secs(config.progress_interval_seconds),
        }
    }
}

// ============================================================================
// Task
// ============================================================================

/// Where a transfer's bytes come from, and the conversation it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceRef {
    Platform {
        conversation_id: String,
        message_id: String,
        file_identifier: String,
    },
    Url {
        conversation_id: String,
        url: Url,
    },
}

impl SourceRef {
    pub fn conversation_id(&self) -> &str {
        match self {
            SourceRef::Platform {
                conversation_id, ..
            }
            | SourceRef::Url {
                conversation_id, ..
            } => conversation_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl TransferStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TransferStatus::Pending => "pending",
            TransferStatus::InProgress => "in_progress",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
        })
    }
}

/// One transfer attempt for a single media item or URL.
#[derive(Debug, Clone)]
pub struct TransferTask {
    pub id: Ulid,
    pub source: SourceRef,
    pub target_path: PathBuf,
    pub kind: MediaKind,
    /// Declared size; `None` when unknown.
    pub byte_size: Option<u64>,
    /// Name shown to the operator.
    pub label: String,
    pub started_at: Option<DateTime<Utc>>,
    /// Attempts made inside the executor beyond the first.
    pub retry_count: u32,
    /// Set for operator-triggered retries of a ledger entry.
    pub is_retry: bool,
    status: TransferStatus,
}

impl TransferTask {
    pub fn new(
        source: SourceRef,
        target_path: PathBuf,
        kind: MediaKind,
        label: impl Into<String>,
    ) -> Self {
        Self {
            id: Ulid::new(),
            source,
            target_path,
            kind,
            byte_size: None,
            label: label.into(),
            started_at: None,
            retry_count: 0,
            is_retry: false,
            status: TransferStatus::Pending,
        }
    }

    /// Task for a resolved platform attachment, saved under `dir`.
    pub fn for_media(
        conversation_id: &str,
        message_id: &str,
        descriptor: &MediaDescriptor,
        dir: &Path,
    ) -> Self {
        let source = SourceRef::Platform {
            conversation_id: conversation_id.to_string(),
            message_id: message_id.to_string(),
            file_identifier: descriptor.file_identifier.clone(),
        };
        let target = unique_target_path(dir, &descriptor.suggested_name);
        Self::new(source, target, descriptor.kind, descriptor.suggested_name.clone())
            .with_byte_size(descriptor.byte_size)
    }

    /// Task for a URL, named after the last path segment.
    pub fn for_url(conversation_id: &str, url: Url, kind: MediaKind, dir: &Path) -> Self {
        let name = url_file_name(&url);
        let target = unique_target_path(dir, &name);
        let label = url.to_string();
        let source = SourceRef::Url {
            conversation_id: conversation_id.to_string(),
            url,
        };
        Self::new(source, target, kind, label)
    }

    /// Zero means unknown.
    pub fn with_byte_size(mut self, size: u64) -> Self {
        self.byte_size = (size > 0).then_some(size);
        self
    }

    pub fn as_retry(mut self) -> Self {
        self.is_retry = true;
        self
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    pub fn conversation_id(&self) -> &str {
        self.source.conversation_id()
    }

    pub(crate) fn mark_in_progress(&mut self) {
        if self.advance(TransferStatus::InProgress) {
            self.started_at = Some(Utc::now());
        }
    }

    pub(crate) fn mark_completed(&mut self) {
        self.advance(TransferStatus::Completed);
    }

    pub(crate) fn mark_failed(&mut self) {
        self.advance(TransferStatus::Failed);
    }

    /// Move forward only. Terminal states never change.
    fn advance(&mut self, next: TransferStatus) -> bool {
        if self.status.is_terminal() || next <= self.status {
            return false;
        }
        self.status = next;
        true
    }
}

/// File name for a URL download: the last non-empty path segment.
pub fn url_file_name(url: &Url) -> String {
    let segment = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        .unwrap_or("");
    if segment.is_empty() {
        return "download".to_string();
    }
    sanitize_file_name(segment)
}

// ============================================================================
// Outcome
// ============================================================================

/// A file that made it to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedFile {
    pub path: PathBuf,
    pub bytes: u64,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    Saved(SavedFile),
    /// The URL served an HTML page; these media links were found on it.
    Page { links: Vec<Url> },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> MediaDescriptor {
        MediaDescriptor {
            kind: MediaKind::Video,
            suggested_name: "clip.mp4".to_string(),
            byte_size: 0,
            content_hint: None,
            file_identifier: "vid".to_string(),
        }
    }

    #[test]
    fn media_task_starts_pending_with_unique_target() {
        let dir = Path::new("/downloads");
        let a = TransferTask::for_media("chat", "7", &descriptor(), dir);
        let b = TransferTask::for_media("chat", "7", &descriptor(), dir);

        assert_eq!(a.status(), TransferStatus::Pending);
        assert_eq!(a.byte_size, None);
        assert_eq!(a.label, "clip.mp4");
        assert_eq!(a.conversation_id(), "chat");
        assert!(a.target_path.starts_with(dir));
        assert_ne!(a.target_path, b.target_path);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn status_only_moves_forward() {
        let mut task = TransferTask::for_media("chat", "7", &descriptor(), Path::new("/d"));

        task.mark_in_progress();
        assert_eq!(task.status(), TransferStatus::InProgress);
        assert!(task.started_at.is_some());

        task.mark_failed();
        assert_eq!(task.status(), TransferStatus::Failed);

        task.mark_completed();
        task.mark_in_progress();
        assert_eq!(task.status(), TransferStatus::Failed);
    }

    #[test]
    fn pending_may_fail_directly() {
        let mut task = TransferTask::for_media("chat", "7", &descriptor(), Path::new("/d"));
        task.mark_failed();
        assert_eq!(task.status(), TransferStatus::Failed);
        assert!(task.started_at.is_none());
    }

    #[test]
    fn url_names_come_from_last_segment() {
        let url = Url::parse("https://example.com/media/cat.jpg?size=large").unwrap();
        assert_eq!(url_file_name(&url), "cat.jpg");

        let url = Url::parse("https://example.com/albums/summer/").unwrap();
        assert_eq!(url_file_name(&url), "summer");

        let url = Url::parse("https://example.com").unwrap();
        assert_eq!(url_file_name(&url), "download");
    }

    #[test]
    fn url_task_keeps_source() {
        let url = Url::parse("https://example.com/a/b.mp4").unwrap();
        let task = TransferTask::for_url("chat", url.clone(), MediaKind::Video, Path::new("/d"));

        assert_eq!(
            task.source,
            SourceRef::Url {
                conversation_id: "chat".to_string(),
                url
            }
        );
        let name = task.target_path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("b_") && name.ends_with(".mp4"));
    }

    #[test]
    fn settings_from_config() {
        let settings = TransferSettings::from_config(&DownloadConfig::default());
        assert_eq!(settings.max_bytes, 2000 * 1024 * 1024);
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.timeout, Some(Duration::from_secs(3600)));
        assert_eq!(settings.progress_interval, Duration::from_secs(2));
    }

    #[test]
    fn zero_timeout_means_unbounded() {
        let config = DownloadConfig {
            timeout_seconds: 0,
            ..Default::default()
        };
        assert_eq!(TransferSettings::from_config(&config).timeout, None);
    }
}
