//! Status-message rendering and the progress sink that edits it.

use std::sync::Arc;

use async_trait::async_trait;
use stashbot_gateway_protocol::{MessageHandle, ReplySink, SendError};
use tracing::debug;

use crate::flood::FloodGate;
use crate::format;
use crate::transfer::{ProgressSink, ProgressUpdate, TransferError};

const BAR_WIDTH: usize = 20;

/// Edits a transfer's status message as progress comes in.
///
/// Edits go straight to the platform sink and are skipped while the
/// conversation cools down, so a slow reply channel never stalls the bytes.
/// A rate-limited edit starts a cool-down and is dropped.
pub(crate) struct StatusProgress {
    sink: Arc<dyn ReplySink>,
    flood: FloodGate,
    handle: Option<MessageHandle>,
    label: String,
}

impl StatusProgress {
    pub(crate) fn new(
        sink: Arc<dyn ReplySink>,
        flood: FloodGate,
        handle: Option<MessageHandle>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            sink,
            flood,
            handle,
            label: label.into(),
        }
    }

    async fn edit(&self, text: &str) {
        let Some(handle) = &self.handle else {
            return;
        };
        if self.flood.check_status(&handle.conversation_id).waiting {
            debug!(
                conversation = %handle.conversation_id,
                "Skipping progress edit during cool-down"
            );
            return;
        }
        match self.sink.edit(handle, text).await {
            Ok(()) => {}
            Err(SendError::RateLimited(wait)) => {
                self.flood.signal(&handle.conversation_id, wait);
            }
            Err(e) => debug!(error = %e, "Progress edit failed"),
        }
    }
}

#[async_trait]
impl ProgressSink for StatusProgress {
    async fn report(&self, update: ProgressUpdate) {
        // The final state is written by the coordinator once the outcome is known.
        if update.done {
            return;
        }
        self.edit(&progress_text(&self.label, &update)).await;
    }

    async fn retrying(&self, attempt: u32, max_attempts: u32, error: &TransferError) {
        self.edit(&format!(
            "🔄 Retrying {} (attempt {}/{})\nLast error: {}",
            self.label,
            attempt,
            max_attempts,
            error.user_message()
        ))
        .await;
    }
}

pub(crate) fn progress_text(label: &str, update: &ProgressUpdate) -> String {
    let mut text = format!("📥 Downloading {}\n", label);
    match (update.percent(), update.total) {
        (Some(percent), Some(total)) => {
            let filled = ((percent / 100.0) * BAR_WIDTH as f64).round() as usize;
            let filled = filled.min(BAR_WIDTH);
            text.push_str(&format!(
                "[{}{}] {:.1}%\n{} / {}\n",
                "█".repeat(filled),
                "░".repeat(BAR_WIDTH - filled),
                percent,
                format::bytes(update.bytes),
                format::bytes(total)
            ));
        }
        _ => text.push_str(&format!("{} received\n", format::bytes(update.bytes))),
    }
    text.push_str(&format!("⚡ {}/s", format::bytes(update.speed() as u64)));
    if let Some(eta) = update.eta() {
        text.push_str(&format!(" · ETA {}", format::duration(eta)));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::test_support::RecordingSink;

    fn update(bytes: u64, total: Option<u64>) -> ProgressUpdate {
        ProgressUpdate {
            bytes,
            total,
            elapsed: Duration::from_secs(10),
            done: false,
        }
    }

    #[test]
    fn text_with_known_total() {
        let text = progress_text("clip.mp4", &update(5_000_000, Some(10_000_000)));
        assert!(text.contains("clip.mp4"));
        assert!(text.contains("50.0%"));
        assert!(text.contains("5.0 MB / 10.0 MB"));
        assert!(text.contains("500.0 KB/s"));
        assert!(text.contains("ETA 0:00:10"));
    }

    #[test]
    fn text_without_total() {
        let text = progress_text("page.bin", &update(2_000, None));
        assert!(text.contains("2.0 KB received"));
        assert!(!text.contains("ETA"));
    }

    fn handle() -> MessageHandle {
        MessageHandle {
            conversation_id: "chat".to_string(),
            message_id: "1".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_edit_starts_cooldown_and_is_dropped() {
        let sink = Arc::new(RecordingSink::new());
        sink.rate_limit_next(Duration::from_secs(30));
        let flood = FloodGate::new(Duration::from_secs(10), None);
        let progress = StatusProgress::new(sink.clone(), flood.clone(), Some(handle()), "clip.mp4");

        progress.report(update(1, Some(2))).await;
        assert!(flood.check_status("chat").waiting);
        assert!(sink.edits().is_empty());

        // Skipped without touching the platform while cooling down.
        progress.report(update(2, Some(4))).await;
        assert!(sink.edits().is_empty());

        tokio::time::advance(Duration::from_secs(31)).await;
        progress.report(update(3, Some(4))).await;
        assert_eq!(sink.edits().len(), 1);
    }

    #[tokio::test]
    async fn done_update_is_left_to_caller() {
        let sink = Arc::new(RecordingSink::new());
        let flood = FloodGate::new(Duration::from_secs(10), None);
        let progress = StatusProgress::new(sink.clone(), flood, Some(handle()), "x");

        let mut done = update(2, Some(2));
        done.done = true;
        progress.report(done).await;
        assert!(sink.edits().is_empty());
    }
}
