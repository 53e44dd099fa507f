//! Download coordinator.
//!
//! Owns every piece of shared state (mode flags, limiter, ledger, flood
//! gate) and routes inbound events through them:
//!
//! ```text
//! event ─► command? ─► handle_command
//!       └► mode gate ─► resolver ─► limiter ─► executor ─► ledger
//! ```
//!
//! Replies go through a [`GatedSink`] so flood control is respected; progress
//! edits use the raw platform sink and are dropped during a cool-down.

mod stats;
mod status;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use stashbot_gateway_protocol::{EventHandler, InboundEvent, MediaSource, MessageHandle, ReplySink};
use tracing::{debug, info, warn};
use url::Url;

use crate::commands::{Command, HELP, parse_url};
use crate::config::Config;
use crate::flood::{FloodGate, GatedSink};
use crate::format;
use crate::ledger::{RetryLedger, RetryTally};
use crate::limiter::ConcurrencyLimiter;
use crate::media::{MediaDescriptor, MediaKind, MediaResolver, Resolution};
use crate::mode::ModeGate;
use crate::scrape::{LinkExtractor, MediaTagExtractor};
use crate::sync::SyncRunner;
use crate::transfer::{
    NoProgress, ProgressSink, TransferError, TransferExecutor, TransferOutcome, TransferSettings,
    TransferTask, url_file_name,
};

pub use stats::{DownloadStats, StatsSnapshot};
use status::StatusProgress;

/// Page links processed between status edits.
const PAGE_STATUS_EVERY: usize = 5;
/// Error lines listed in a summary before truncating.
const MAX_LISTED_ERRORS: usize = 10;

const RETRY_HINT: &str = "Use /retry_download to try again.";

pub struct Coordinator {
    download_dir: PathBuf,
    mode: ModeGate,
    limiter: ConcurrencyLimiter,
    ledger: RetryLedger,
    flood: FloodGate,
    resolver: MediaResolver,
    executor: TransferExecutor,
    sync: SyncRunner,
    stats: DownloadStats,
    /// Flood-gated sink for every reply and final status edit.
    replies: Arc<dyn ReplySink>,
    /// Platform sink for best-effort progress edits.
    platform: Arc<dyn ReplySink>,
}

impl Coordinator {
    pub fn new(config: &Config, platform: Arc<dyn ReplySink>, media: Arc<dyn MediaSource>) -> Self {
        Self::with_link_extractor(config, platform, media, Arc::new(MediaTagExtractor))
    }

    pub fn with_link_extractor(
        config: &Config,
        platform: Arc<dyn ReplySink>,
        media: Arc<dyn MediaSource>,
        links: Arc<dyn LinkExtractor>,
    ) -> Self {
        let flood = FloodGate::new(config.flood.status_interval(), Some(platform.clone()));
        let replies: Arc<dyn ReplySink> = Arc::new(GatedSink::new(
            platform.clone(),
            flood.clone(),
            config.flood.max_rate_limit_waits,
        ));
        let executor = TransferExecutor::new(
            TransferSettings::from_config(&config.download),
            media,
            reqwest::Client::new(),
            links,
            flood.clone(),
        );

        Self {
            download_dir: config.download.dir.clone(),
            mode: ModeGate::new(),
            limiter: ConcurrencyLimiter::new(config.download.max_concurrent),
            ledger: RetryLedger::new(),
            flood,
            resolver: MediaResolver::new(
                &config.download.allowed_extensions,
                &config.download.allowed_mime_prefixes,
            ),
            executor,
            sync: SyncRunner::new(config.sync.clone(), config.sync_failure_log()),
            stats: DownloadStats::new(),
            replies,
            platform,
        }
    }

    pub fn mode(&self) -> &ModeGate {
        &self.mode
    }

    pub fn ledger(&self) -> &RetryLedger {
        &self.ledger
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    pub fn flood(&self) -> &FloodGate {
        &self.flood
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    // ------------------------------------------------------------------------
    // Media
    // ------------------------------------------------------------------------

    async fn handle_media_event(&self, event: &InboundEvent) {
        if !self.mode.is_download_active() {
            debug!(message = %event.message_id, "Download mode off, ignoring media");
            return;
        }

        match self.resolver.resolve(event) {
            Resolution::Media(descriptor) => self.download_media(event, &descriptor).await,
            Resolution::Unsupported { name, reason } => {
                info!(name = %name, reason = %reason, "Unsupported media");
                let error = TransferError::Unsupported(reason);
                self.say(
                    &event.conversation_id,
                    &failure_text(&name, &error, false),
                )
                .await;
            }
            Resolution::NoMedia => {
                debug!(message = %event.message_id, "No usable media in message");
            }
        }
    }

    async fn download_media(&self, event: &InboundEvent, descriptor: &MediaDescriptor) {
        let mut task = TransferTask::for_media(
            &event.conversation_id,
            &event.message_id,
            descriptor,
            &self.download_dir,
        );
        info!(
            task = %task.id,
            kind = %task.kind,
            label = %task.label,
            size = descriptor.byte_size,
            "Media received"
        );

        let size = match task.byte_size {
            Some(size) => format!(" ({})", format::bytes(size)),
            None => String::new(),
        };
        let status = self
            .say(
                &event.conversation_id,
                &format!("⏳ Queued {} {}{}", task.kind, task.label, size),
            )
            .await;

        let result = self.run_task(&mut task, status.as_ref()).await;
        let text = match result {
            Ok(TransferOutcome::Saved(saved)) => {
                saved_text(&task.label, saved.bytes, saved.elapsed)
            }
            Ok(TransferOutcome::Page { .. }) => {
                let error = TransferError::Unsupported("not a media file".into());
                failure_text(&task.label, &error, false)
            }
            Err(e) => failure_text(&task.label, &e, !task.is_retry),
        };
        self.finish(&event.conversation_id, status.as_ref(), &text)
            .await;
    }

    // ------------------------------------------------------------------------
    // URLs
    // ------------------------------------------------------------------------

    async fn download_url(&self, conversation_id: &str, url: Url) {
        let status = self
            .say(conversation_id, &format!("🔗 Fetching {}", url))
            .await;
        let mut task = self.url_task(conversation_id, url);

        match self.run_task(&mut task, status.as_ref()).await {
            Ok(TransferOutcome::Saved(saved)) => {
                let text = saved_text(&url_file_name_of(&task), saved.bytes, saved.elapsed);
                self.finish(conversation_id, status.as_ref(), &text).await;
            }
            Ok(TransferOutcome::Page { links }) if links.is_empty() => {
                self.finish(conversation_id, status.as_ref(), "🔍 No media found on that page.")
                    .await;
            }
            Ok(TransferOutcome::Page { links }) => {
                self.download_page_links(conversation_id, status.as_ref(), links)
                    .await;
            }
            Err(e) => {
                let text = failure_text(&task.label, &e, true);
                self.finish(conversation_id, status.as_ref(), &text).await;
            }
        }
    }

    /// Transfer every link found on a page, one level deep.
    async fn download_page_links(
        &self,
        conversation_id: &str,
        status: Option<&MessageHandle>,
        links: Vec<Url>,
    ) {
        let total = links.len();
        info!(conversation = %conversation_id, total, "Downloading links from page");
        self.finish(
            conversation_id,
            status,
            &format!("🔍 Found {} media links. Downloading...", total),
        )
        .await;

        let mut succeeded = 0;
        let mut errors = Vec::new();
        for (index, link) in links.into_iter().enumerate() {
            let mut task = self.url_task(conversation_id, link);
            match self.run_task(&mut task, None).await {
                Ok(TransferOutcome::Saved(_)) => succeeded += 1,
                Ok(TransferOutcome::Page { .. }) => {
                    errors.push(format!("{}: nested pages are not followed", task.label));
                }
                Err(e) => {
                    errors.push(format!("{} ({}): {}", task.label, e.kind(), e.user_message()));
                }
            }

            let done = index + 1;
            if done % PAGE_STATUS_EVERY == 0 && done < total {
                self.finish(
                    conversation_id,
                    status,
                    &format!(
                        "📥 Progress: {}/{}\n✅ {} saved · ❌ {} failed",
                        done,
                        total,
                        succeeded,
                        errors.len()
                    ),
                )
                .await;
            }
        }

        let mut summary = format!("✅ Downloaded {}/{} files", succeeded, total);
        if !errors.is_empty() {
            summary.push_str(&format!("\n❌ Failed: {}", errors.len()));
        }
        self.finish(conversation_id, status, &summary).await;

        if !errors.is_empty() {
            let mut report = String::from("❌ Errors:\n");
            report.push_str(&list_errors(&errors));
            report.push('\n');
            report.push_str(RETRY_HINT);
            self.say(conversation_id, &report).await;
        }
    }

    fn url_task(&self, conversation_id: &str, url: Url) -> TransferTask {
        let kind = self
            .resolver
            .kind_for_name(&url_file_name(&url))
            .unwrap_or(MediaKind::Document);
        TransferTask::for_url(conversation_id, url, kind, &self.download_dir)
    }

    // ------------------------------------------------------------------------
    // Transfers
    // ------------------------------------------------------------------------

    /// Run a task under a limiter slot and keep the ledger in step.
    async fn run_task(
        &self,
        task: &mut TransferTask,
        status: Option<&MessageHandle>,
    ) -> Result<TransferOutcome, TransferError> {
        let progress = StatusProgress::new(
            self.platform.clone(),
            self.flood.clone(),
            status.cloned(),
            task.label.clone(),
        );
        let result = self.execute_with_slot(task, &progress).await;

        match &result {
            Ok(TransferOutcome::Saved(_)) => {
                self.ledger.clear_on_success(&task.target_path).await;
            }
            Ok(TransferOutcome::Page { .. }) => {}
            Err(e) if e.is_rejection() => {}
            Err(e) => self.ledger.record(task, e).await,
        }
        result
    }

    async fn execute_with_slot(
        &self,
        task: &mut TransferTask,
        progress: &dyn ProgressSink,
    ) -> Result<TransferOutcome, TransferError> {
        let _slot = self
            .limiter
            .acquire()
            .await
            .map_err(|e| TransferError::Unknown(e.to_string()))?;
        let result = self.executor.execute(task, progress).await;
        self.stats.observe(&result);
        result
    }

    async fn retry_entry(&self, mut task: TransferTask) -> Result<(), TransferError> {
        match self.execute_with_slot(&mut task, &NoProgress).await? {
            TransferOutcome::Saved(_) => Ok(()),
            TransferOutcome::Page { .. } => Err(TransferError::Unsupported(
                "link now serves a web page".to_string(),
            )),
        }
    }

    // ------------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------------

    async fn handle_command(&self, conversation_id: &str, command: Command) {
        debug!(conversation = %conversation_id, command = ?command, "Command received");
        match command {
            Command::Start => {
                self.say(conversation_id, HELP).await;
            }
            Command::Download(None) => {
                let text = if self.mode.activate_download() {
                    "✅ Download mode on. Forward photos or videos to save them."
                } else {
                    "ℹ️ Download mode is already on."
                };
                self.say(conversation_id, text).await;
            }
            Command::Download(Some(arg)) => match parse_url(&arg) {
                Some(url) => self.download_url(conversation_id, url).await,
                None => {
                    self.say(conversation_id, "❌ That is not an http(s) URL.")
                        .await;
                }
            },
            Command::Stop => {
                let text = if self.mode.deactivate_download() {
                    "⏹ Download mode off."
                } else {
                    "ℹ️ Download mode is already off."
                };
                self.say(conversation_id, text).await;
            }
            Command::Upload => self.upload(conversation_id).await,
            Command::RetryUpload => self.retry_upload(conversation_id).await,
            Command::RetryDownload => self.retry_downloads(conversation_id).await,
            Command::Status => {
                let text = self.status_text(conversation_id).await;
                self.say(conversation_id, &text).await;
            }
            Command::Stats => {
                self.say(conversation_id, &stats::stats_text(&self.stats.snapshot()))
                    .await;
            }
            Command::Unknown(name) => {
                self.say(
                    conversation_id,
                    &format!("❓ Unknown command /{}. Send /start for help.", name),
                )
                .await;
            }
        }
    }

    /// Refuse a sync while transfers still write into the download folder.
    async fn transfers_running(&self, conversation_id: &str) -> bool {
        if self.limiter.in_flight() == 0 {
            return false;
        }
        self.say(
            conversation_id,
            "⏳ Downloads are still running. Try again when they finish.",
        )
        .await;
        true
    }

    async fn upload(&self, conversation_id: &str) {
        if self.transfers_running(conversation_id).await {
            return;
        }
        let Some(_guard) = self.mode.try_begin_sync() else {
            self.say(conversation_id, "⏳ A sync is already running.").await;
            return;
        };

        let status = self
            .say(conversation_id, "☁️ Syncing downloads to the cloud...")
            .await;
        let text = match self.sync.run(&self.download_dir).await {
            Ok(report) => format!(
                "✅ Sync complete in {}.\n🧹 Removed {} local files.",
                format::duration(report.elapsed),
                report.files_removed
            ),
            Err(e) => format!("❌ Sync failed: {}\nUse /retry_upload to try again.", e),
        };
        self.finish(conversation_id, status.as_ref(), &text).await;
    }

    async fn retry_upload(&self, conversation_id: &str) {
        if self.transfers_running(conversation_id).await {
            return;
        }
        let Some(_guard) = self.mode.try_begin_sync() else {
            self.say(conversation_id, "⏳ A sync is already running.").await;
            return;
        };

        let status = self.say(conversation_id, "🔄 Retrying failed syncs...").await;
        let text = match self.sync.retry_failed().await {
            Ok(tally) if tally.succeeded + tally.still_failed == 0 => {
                "ℹ️ No failed syncs to retry.".to_string()
            }
            Ok(tally) => tally_text("Sync retry", &tally),
            Err(e) => format!("❌ Could not read the sync failure log: {}", e),
        };
        self.finish(conversation_id, status.as_ref(), &text).await;
    }

    async fn retry_downloads(&self, conversation_id: &str) {
        let pending = self.ledger.len().await;
        if pending == 0 {
            self.say(conversation_id, "ℹ️ No failed downloads to retry.")
                .await;
            return;
        }

        let status = self
            .say(
                conversation_id,
                &format!("🔄 Retrying {} failed downloads...", pending),
            )
            .await;
        let tally = self
            .ledger
            .drain_and_retry(|task| self.retry_entry(task))
            .await;
        self.finish(
            conversation_id,
            status.as_ref(),
            &tally_text("Retry", &tally),
        )
        .await;
    }

    async fn status_text(&self, conversation_id: &str) -> String {
        let flood = self.flood.check_status(conversation_id);
        let flood_line = if flood.waiting {
            format!("⏳ Flood control: {} seconds remaining", flood.remaining.as_secs())
        } else {
            "✅ Flood control: normal".to_string()
        };
        format!(
            "📊 Status\n{}\n📥 Download mode: {}\n🔄 Active transfers: {}/{}\n\
             📋 Failed downloads: {}\n☁️ Sync: {}",
            flood_line,
            if self.mode.is_download_active() { "on" } else { "off" },
            self.limiter.in_flight(),
            self.limiter.capacity(),
            self.ledger.len().await,
            if self.mode.is_sync_in_progress() { "running" } else { "idle" },
        )
    }

    // ------------------------------------------------------------------------
    // Replies
    // ------------------------------------------------------------------------

    /// Send a reply. Failures are logged; the handle is returned on success.
    async fn say(&self, conversation_id: &str, text: &str) -> Option<MessageHandle> {
        match self.replies.reply(conversation_id, text).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(conversation = %conversation_id, error = %e, "Failed to send reply");
                None
            }
        }
    }

    /// Replace the status message, or send a new one when there is none.
    async fn finish(&self, conversation_id: &str, status: Option<&MessageHandle>, text: &str) {
        if let Some(handle) = status {
            match self.replies.edit(handle, text).await {
                Ok(()) => return,
                Err(e) => debug!(error = %e, "Status edit failed, replying instead"),
            }
        }
        self.say(conversation_id, text).await;
    }
}

#[async_trait]
impl EventHandler for Coordinator {
    async fn handle(&self, event: InboundEvent) {
        if let Some(command) = event.text().and_then(Command::parse) {
            self.handle_command(&event.conversation_id, command).await;
            return;
        }

        if !event.attachments.is_empty() {
            self.handle_media_event(&event).await;
            return;
        }

        if let Some(url) = event.text().and_then(parse_url) {
            if self.mode.is_download_active() {
                self.download_url(&event.conversation_id, url).await;
            } else {
                debug!(url = %url, "Download mode off, ignoring link");
            }
        }
    }
}

// ============================================================================
// Message text
// ============================================================================

fn url_file_name_of(task: &TransferTask) -> String {
    task.target_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| task.label.clone())
}

fn saved_text(label: &str, bytes: u64, elapsed: std::time::Duration) -> String {
    format!(
        "✅ Saved {}\n📦 {} in {}",
        label,
        format::bytes(bytes),
        format::duration(elapsed)
    )
}

fn failure_text(label: &str, error: &TransferError, hint: bool) -> String {
    let mut text = format!(
        "❌ Failed to download {}\nError ({}): {}",
        label,
        error.kind(),
        error.user_message()
    );
    if hint && !error.is_rejection() {
        text.push('\n');
        text.push_str(RETRY_HINT);
    }
    text
}

fn tally_text(what: &str, tally: &RetryTally) -> String {
    let mut text = format!(
        "🔄 {} complete\n✅ Succeeded: {}\n❌ Still failed: {}",
        what, tally.succeeded, tally.still_failed
    );
    if !tally.errors.is_empty() {
        text.push('\n');
        text.push_str(&list_errors(&tally.errors));
    }
    text
}

fn list_errors(errors: &[String]) -> String {
    let mut lines: Vec<String> = errors
        .iter()
        .take(MAX_LISTED_ERRORS)
        .map(|e| format!("• {}", e))
        .collect();
    if errors.len() > MAX_LISTED_ERRORS {
        lines.push(format!("…and {} more", errors.len() - MAX_LISTED_ERRORS));
    }
    lines.join("\n")
}

// ============================================================================
// Tests
// ============================================================================
