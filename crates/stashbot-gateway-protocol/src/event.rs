//! Inbound events produced by gateways.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A message received from a chat platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Conversation the message arrived in. Flood control is keyed on this.
    pub conversation_id: String,
    /// Platform message id, unique within the conversation.
    pub message_id: String,
    /// Platform user id of the sender, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    /// Whether the message was forwarded from elsewhere.
    #[serde(default)]
    pub forwarded: bool,
    /// Message text or media caption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Media attached to the message.
    #[serde(default)]
    pub attachments: Attachments,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    /// Create an event with no text and no attachments.
    pub fn new(conversation_id: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            message_id: message_id.into(),
            sender_id: None,
            forwarded: false,
            text: None,
            attachments: Attachments::default(),
            received_at: Utc::now(),
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_attachments(mut self, attachments: Attachments) -> Self {
        self.attachments = attachments;
        self
    }

    /// Trimmed message text, if any.
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref().map(str::trim).filter(|t| !t.is_empty())
    }
}

/// Optional media fields of an inbound message.
///
/// Platforms send photos as several resolutions of the same image, so `photo`
/// is a list. The other kinds carry at most one attachment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attachments {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub photo: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animation: Option<Attachment>,
}

impl Attachments {
    pub fn is_empty(&self) -> bool {
        self.video.is_none()
            && self.photo.is_empty()
            && self.document.is_none()
            && self.animation.is_none()
    }
}

/// A single platform file reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Identifier used to fetch the bytes through a [`crate::MediaSource`].
    pub file_identifier: String,
    /// Identifier that stays stable across bots and re-sends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,
    /// Size reported by the platform, in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub declared_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl Attachment {
    pub fn new(file_identifier: impl Into<String>, declared_size: Option<u64>) -> Self {
        Self {
            file_identifier: file_identifier.into(),
            unique_id: None,
            declared_size,
            declared_name: None,
            mime_type: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.declared_name = Some(name.into());
        self
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime_type = Some(mime.into());
        self
    }
}

/// Receives inbound events from a gateway.
///
/// Gateways call `handle` once per message, each on its own task, so
/// implementations must tolerate concurrent calls.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: InboundEvent);
}
