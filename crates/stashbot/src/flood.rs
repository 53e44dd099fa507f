//! Flood-control gate.
//!
//! Chat platforms answer excessive API use with a mandatory wait. The gate
//! records one cool-down per conversation, so unrelated conversations keep
//! working, and offers two ways to respect it:
//!
//! - [`FloodGate::check_status`] never blocks and reports the remaining wait.
//! - [`FloodGate::wait`] suspends the caller until the cool-down ends, editing
//!   a status message at a coarse interval so the operator sees progress.
//!
//! [`GatedSink`] applies the gate to every outbound reply and edit.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use stashbot_gateway_protocol::{MessageHandle, ReplySink, SendError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

// ============================================================================
// Types
// ============================================================================

/// An active cool-down for one conversation.
#[derive(Debug, Clone)]
pub struct FloodCoolDown {
    pub conversation_id: String,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub duration: Duration,
    deadline: Instant,
}

/// Answer of a non-blocking status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloodStatus {
    pub waiting: bool,
    pub remaining: Duration,
}

impl FloodStatus {
    const NORMAL: FloodStatus = FloodStatus {
        waiting: false,
        remaining: Duration::ZERO,
    };
}

// ============================================================================
// FloodGate
// ============================================================================

/// Per-conversation cool-down tracker. Cheap to clone.
#[derive(Clone)]
pub struct FloodGate {
    cooldowns: Arc<DashMap<String, FloodCoolDown>>,
    status_interval: Duration,
    /// Raw platform sink for cool-down notices. Must not be gated itself.
    notifier: Option<Arc<dyn ReplySink>>,
}

impl FloodGate {
    pub fn new(status_interval: Duration, notifier: Option<Arc<dyn ReplySink>>) -> Self {
        Self {
            cooldowns: Arc::new(DashMap::new()),
            status_interval,
            notifier,
        }
    }

    /// Record a rate-limit signal. An existing longer cool-down is kept.
    pub fn signal(&self, conversation_id: &str, wait: Duration) -> FloodCoolDown {
        let now = Instant::now();
        let deadline = now + wait;
        let started_at = Utc::now();
        let ends_at =
            started_at + chrono::Duration::from_std(wait).unwrap_or(chrono::Duration::zero());

        let mut entry = self
            .cooldowns
            .entry(conversation_id.to_string())
            .or_insert_with(|| FloodCoolDown {
                conversation_id: conversation_id.to_string(),
                started_at,
                ends_at,
                duration: wait,
                deadline,
            });
        if entry.deadline < deadline {
            *entry = FloodCoolDown {
                conversation_id: conversation_id.to_string(),
                started_at,
                ends_at,
                duration: wait,
                deadline,
            };
        }
        info!(
            conversation = %conversation_id,
            wait_secs = wait.as_secs(),
            "Flood control cool-down started"
        );
        entry.value().clone()
    }

    /// Report whether the conversation is cooling down. Never blocks.
    ///
    /// Expired entries are dropped here, so a cool-down reads as over once
    /// its end has passed even if nobody cleared it.
    pub fn check_status(&self, conversation_id: &str) -> FloodStatus {
        let now = Instant::now();
        let remaining = self
            .cooldowns
            .get(conversation_id)
            .map(|c| c.deadline.saturating_duration_since(now));

        match remaining {
            Some(remaining) if !remaining.is_zero() => FloodStatus {
                waiting: true,
                remaining,
            },
            Some(_) => {
                self.clear_expired(conversation_id);
                FloodStatus::NORMAL
            }
            None => FloodStatus::NORMAL,
        }
    }

    /// Current cool-down for a conversation, if still running.
    pub fn cooldown(&self, conversation_id: &str) -> Option<FloodCoolDown> {
        self.check_status(conversation_id)
            .waiting
            .then(|| self.cooldowns.get(conversation_id).map(|c| c.value().clone()))
            .flatten()
    }

    /// Suspend until the conversation's cool-down (if any) is over.
    pub async fn wait_if_cooling(&self, conversation_id: &str) {
        loop {
            let status = self.check_status(conversation_id);
            if !status.waiting {
                return;
            }
            debug!(
                conversation = %conversation_id,
                remaining_secs = status.remaining.as_secs(),
                "Deferring until cool-down ends"
            );
            tokio::time::sleep(status.remaining).await;
        }
    }

    /// Register a rate-limit signal and sit it out, posting status updates.
    ///
    /// When another caller is already announcing a cool-down for the same
    /// conversation, this one waits silently.
    pub async fn wait(&self, conversation_id: &str, wait: Duration) {
        let announce = !self.check_status(conversation_id).waiting;
        let cooldown = self.signal(conversation_id, wait);

        if !announce {
            self.wait_if_cooling(conversation_id).await;
            return;
        }

        let notice = self
            .notify(
                conversation_id,
                &format!(
                    "⚠️ Flood control active!\n⏳ Please wait {} seconds.\n\
                     ⏰ Resuming at: {}",
                    wait.as_secs(),
                    cooldown.ends_at.format("%H:%M:%S UTC")
                ),
            )
            .await;

        loop {
            let status = self.check_status(conversation_id);
            if !status.waiting {
                break;
            }
            tokio::time::sleep(status.remaining.min(self.status_interval)).await;

            let status = self.check_status(conversation_id);
            if status.waiting {
                if let Some(handle) = &notice {
                    self.edit_notice(
                        handle,
                        &format!(
                            "⚠️ Flood control active!\n⏳ Remaining: {} seconds",
                            status.remaining.as_secs()
                        ),
                    )
                    .await;
                }
            }
        }

        self.clear_expired(conversation_id);
        info!(conversation = %conversation_id, "Flood control cool-down ended");
        if let Some(handle) = &notice {
            self.edit_notice(handle, "✅ Flood control period ended. Resuming operations.")
                .await;
        }
    }

    fn clear_expired(&self, conversation_id: &str) {
        let now = Instant::now();
        self.cooldowns
            .remove_if(conversation_id, |_, c| c.deadline <= now);
    }

    async fn notify(&self, conversation_id: &str, text: &str) -> Option<MessageHandle> {
        let notifier = self.notifier.as_ref()?;
        match notifier.reply(conversation_id, text).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                debug!(
                    conversation = %conversation_id,
                    error = %e,
                    "Could not post cool-down notice"
                );
                None
            }
        }
    }

    async fn edit_notice(&self, handle: &MessageHandle, text: &str) {
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.edit(handle, text).await {
                debug!(
                    conversation = %handle.conversation_id,
                    error = %e,
                    "Could not update cool-down notice"
                );
            }
        }
    }
}

// ============================================================================
// GatedSink
// ============================================================================

/// Reply sink that defers calls during a cool-down and sits out rate limits.
pub struct GatedSink {
    inner: Arc<dyn ReplySink>,
    gate: FloodGate,
    max_waits: u32,
}

impl GatedSink {
    pub fn new(inner: Arc<dyn ReplySink>, gate: FloodGate, max_waits: u32) -> Self {
        Self {
            inner,
            gate,
            max_waits,
        }
    }

    async fn call<T, F, Fut>(&self, conversation_id: &str, mut op: F) -> Result<T, SendError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, SendError>>,
    {
        let mut waits = 0;
        loop {
            self.gate.wait_if_cooling(conversation_id).await;
            match op().await {
                Err(SendError::RateLimited(wait)) if waits < self.max_waits => {
                    waits += 1;
                    self.gate.wait(conversation_id, wait).await;
                }
                Err(SendError::RateLimited(wait)) => {
                    warn!(
                        conversation = %conversation_id,
                        waits,
                        "Still rate limited after waiting, giving up on message"
                    );
                    return Err(SendError::RateLimited(wait));
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl ReplySink for GatedSink {
    async fn reply(&self, conversation_id: &str, text: &str) -> Result<MessageHandle, SendError> {
        self.call(conversation_id, || self.inner.reply(conversation_id, text))
            .await
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<(), SendError> {
        self.call(&handle.conversation_id, || self.inner.edit(handle, text))
            .await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingSink;

    fn gate_with(sink: &Arc<RecordingSink>) -> FloodGate {
        FloodGate::new(
            Duration::from_secs(10),
            Some(sink.clone() as Arc<dyn ReplySink>),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn status_counts_down_then_clears_itself() {
        let gate = FloodGate::new(Duration::from_secs(10), None);
        gate.signal("chat", Duration::from_secs(5));

        let first = gate.check_status("chat");
        assert!(first.waiting);
        assert_eq!(first.remaining, Duration::from_secs(5));

        tokio::time::advance(Duration::from_secs(2)).await;
        let second = gate.check_status("chat");
        assert!(second.waiting);
        assert!(second.remaining < first.remaining);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(gate.check_status("chat"), FloodStatus::NORMAL);
        assert!(gate.cooldowns.get("chat").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn cooldowns_are_per_conversation() {
        let gate = FloodGate::new(Duration::from_secs(10), None);
        gate.signal("a", Duration::from_secs(30));

        assert!(gate.check_status("a").waiting);
        assert!(!gate.check_status("b").waiting);
    }

    #[tokio::test(start_paused = true)]
    async fn shorter_signal_does_not_shorten_cooldown() {
        let gate = FloodGate::new(Duration::from_secs(10), None);
        gate.signal("chat", Duration::from_secs(30));
        gate.signal("chat", Duration::from_secs(5));

        assert_eq!(gate.check_status("chat").remaining, Duration::from_secs(30));
        assert_eq!(gate.cooldown("chat").unwrap().duration, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_blocks_and_posts_coarse_updates() {
        let sink = Arc::new(RecordingSink::new());
        let gate = gate_with(&sink);

        let start = Instant::now();
        gate.wait("chat", Duration::from_secs(25)).await;

        assert!(start.elapsed() >= Duration::from_secs(25));
        assert!(!gate.check_status("chat").waiting);

        let replies = sink.replies();
        assert_eq!(replies.len(), 1);
        assert!(replies[0].contains("Please wait 25 seconds"));

        let edits = sink.edits();
        // Updates at 10s and 20s, then the end notice.
        assert_eq!(edits.len(), 3);
        assert!(edits[0].contains("Remaining: 15 seconds"));
        assert!(edits[1].contains("Remaining: 5 seconds"));
        assert!(edits[2].contains("ended"));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_if_cooling_returns_immediately_when_normal() {
        let gate = FloodGate::new(Duration::from_secs(10), None);
        let start = Instant::now();
        gate.wait_if_cooling("chat").await;
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn gated_sink_sits_out_rate_limit_and_retries() {
        let platform = Arc::new(RecordingSink::new());
        platform.rate_limit_next(Duration::from_secs(5));
        let gate = FloodGate::new(Duration::from_secs(10), None);
        let sink = GatedSink::new(platform.clone(), gate.clone(), 3);

        let start = Instant::now();
        let handle = sink.reply("chat", "hello").await.unwrap();

        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(handle.conversation_id, "chat");
        assert_eq!(platform.replies(), vec!["hello".to_string()]);
        assert!(!gate.check_status("chat").waiting);
    }

    #[tokio::test(start_paused = true)]
    async fn gated_sink_defers_during_cooldown() {
        let platform = Arc::new(RecordingSink::new());
        let gate = FloodGate::new(Duration::from_secs(10), None);
        gate.signal("chat", Duration::from_secs(8));
        let sink = GatedSink::new(platform.clone(), gate, 3);

        let start = Instant::now();
        sink.reply("chat", "later").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(8));

        let start = Instant::now();
        sink.reply("other", "now").await.unwrap();
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn gated_sink_gives_up_after_max_waits() {
        let platform = Arc::new(RecordingSink::new());
        for _ in 0..3 {
            platform.rate_limit_next(Duration::from_secs(1));
        }
        let gate = FloodGate::new(Duration::from_secs(10), None);
        let sink = GatedSink::new(platform.clone(), gate, 2);

        let err = sink.reply("chat", "doomed").await.unwrap_err();
        assert!(matches!(err, SendError::RateLimited(_)));
        assert!(platform.replies().is_empty());
    }
}
