use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;

use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// Config (root)
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub flood: FloodConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

impl Config {
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = match fs::read_to_string(path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Ok(serde_saphyr::from_str(&contents)?)
    }

    /// Path of the sync failure log inside the download directory.
    pub fn sync_failure_log(&self) -> PathBuf {
        self.download.dir.join(&self.sync.failure_log)
    }
}

// ============================================================================
// DownloadConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadConfig {
    #[serde(default = "default_download_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size_bytes: usize,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Attempts per transfer before the failure is reported (>= 1).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base of the linear backoff between attempts.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    /// Wall-clock budget per transfer. 0 means no limit.
    #[serde(default = "default_transfer_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_progress_interval")]
    pub progress_interval_seconds: u64,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: PerKind,
    /// Content-type prefixes accepted for documents without a known extension.
    #[serde(default = "default_allowed_mime_prefixes")]
    pub allowed_mime_prefixes: PerKind,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            dir: default_download_dir(),
            max_file_size_mb: default_max_file_size_mb(),
            chunk_size_bytes: default_chunk_size(),
            max_concurrent: default_max_concurrent(),
            max_attempts: default_max_attempts(),
            retry_delay_seconds: default_retry_delay(),
            timeout_seconds: default_transfer_timeout(),
            progress_interval_seconds: default_progress_interval(),
            allowed_extensions: default_allowed_extensions(),
            allowed_mime_prefixes: default_allowed_mime_prefixes(),
        }
    }
}

impl DownloadConfig {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

/// One list per media kind.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PerKind {
    #[serde(default)]
    pub photo: Vec<String>,
    #[serde(default)]
    pub video: Vec<String>,
    #[serde(default)]
    pub animation: Vec<String>,
    #[serde(default)]
    pub document: Vec<String>,
}

fn default_download_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_max_file_size_mb() -> u64 {
    2000
}

fn default_chunk_size() -> usize {
    1024 * 1024
}

fn default_max_concurrent() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    2
}

fn default_transfer_timeout() -> u64 {
    3600
}

fn default_progress_interval() -> u64 {
    2
}

fn default_allowed_extensions() -> PerKind {
    let list = |exts: &[&str]| exts.iter().map(|e| e.to_string()).collect();
    PerKind {
        photo: list(&[".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp", ".tiff"]),
        video: list(&[".mp4", ".avi", ".mkv", ".mov", ".wmv", ".flv", ".webm", ".m4v"]),
        animation: Vec::new(),
        document: Vec::new(),
    }
}

fn default_allowed_mime_prefixes() -> PerKind {
    PerKind {
        photo: vec!["image/".to_string()],
        video: vec!["video/".to_string()],
        animation: Vec::new(),
        document: Vec::new(),
    }
}

// ============================================================================
// FloodConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct FloodConfig {
    /// How often a running cool-down edits its status message.
    #[serde(default = "default_status_interval")]
    pub status_interval_seconds: u64,
    /// Cool-downs sat out per outbound call before giving up.
    #[serde(default = "default_max_rate_limit_waits")]
    pub max_rate_limit_waits: u32,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            status_interval_seconds: default_status_interval(),
            max_rate_limit_waits: default_max_rate_limit_waits(),
        }
    }
}

impl FloodConfig {
    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_seconds.max(1))
    }
}

fn default_status_interval() -> u64 {
    10
}

fn default_max_rate_limit_waits() -> u32 {
    3
}

// ============================================================================
// SyncConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_sync_binary")]
    pub binary: PathBuf,
    #[serde(default = "default_remote_target")]
    pub remote_target: String,
    #[serde(default = "default_sync_transfers")]
    pub transfers: u32,
    #[serde(default = "default_sync_chunk_size")]
    pub chunk_size: String,
    #[serde(default = "default_sync_rate_limit")]
    pub rate_limit: u32,
    /// Delete local files after a successful sync.
    #[serde(default = "default_true")]
    pub cleanup_after_sync: bool,
    /// File name of the failure log, relative to the download directory.
    #[serde(default = "default_failure_log")]
    pub failure_log: PathBuf,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            binary: default_sync_binary(),
            remote_target: default_remote_target(),
            transfers: default_sync_transfers(),
            chunk_size: default_sync_chunk_size(),
            rate_limit: default_sync_rate_limit(),
            cleanup_after_sync: true,
            failure_log: default_failure_log(),
        }
    }
}

fn default_sync_binary() -> PathBuf {
    PathBuf::from("rclone")
}

fn default_remote_target() -> String {
    "gphotos:album/Stashbot".to_string()
}

fn default_sync_transfers() -> u32 {
    32
}

fn default_sync_chunk_size() -> String {
    "128M".to_string()
}

fn default_sync_rate_limit() -> u32 {
    20
}

fn default_failure_log() -> PathBuf {
    PathBuf::from("sync_failures.jsonl")
}

fn default_true() -> bool {
    true
}

// ============================================================================
// TelegramConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    /// Bot token. `TELEGRAM_BOT_TOKEN` takes precedence when set.
    #[serde(default)]
    pub token: Option<String>,
    /// Users allowed to talk to the bot. Empty means everyone.
    #[serde(default)]
    pub allowed_user_ids: Vec<u64>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: None,
            allowed_user_ids: Vec::new(),
            api_url: default_api_url(),
        }
    }
}

impl TelegramConfig {
    /// Resolve the bot token from the environment, falling back to the file.
    pub fn resolve_token(&self) -> Option<String> {
        std::env::var("TELEGRAM_BOT_TOKEN")
            .ok()
            .filter(|t| !t.is_empty())
            .or_else(|| self.token.clone())
    }
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

// ============================================================================
// ConfigError
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),
}

// ============================================================================
// Tests
// ============================================================================
