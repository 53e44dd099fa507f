//! Outbound replies.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reference to a message the bot sent, used to edit it later.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle {
    pub conversation_id: String,
    pub message_id: String,
}

/// Errors returned by a [`ReplySink`].
#[derive(Debug, Error)]
pub enum SendError {
    /// The platform rejected the call because of flood control.
    #[error("rate limited (retry after {}s)", .0.as_secs())]
    RateLimited(Duration),

    /// Any other platform failure.
    #[error("platform error: {0}")]
    Platform(String),
}

/// Sends and edits text messages on the platform.
///
/// Implementations are themselves subject to platform rate limiting and must
/// report it as [`SendError::RateLimited`].
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Send a new message to a conversation.
    async fn reply(&self, conversation_id: &str, text: &str) -> Result<MessageHandle, SendError>;

    /// Replace the text of a message previously sent with [`ReplySink::reply`].
    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<(), SendError>;
}
