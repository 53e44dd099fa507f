//! Media descriptors and how they are derived from inbound events.

mod naming;
mod resolver;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use naming::{sanitize_file_name, unique_target_path};
pub use resolver::MediaResolver;

/// Kind of media a transfer carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Document,
    Animation,
}

impl MediaKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Document => "document",
            MediaKind::Animation => "animation",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized view of the one attachment an event carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    pub kind: MediaKind,
    /// File name to save under, already sanitized.
    pub suggested_name: String,
    /// Declared size in bytes; 0 when the platform did not say.
    pub byte_size: u64,
    /// Declared content type.
    pub content_hint: Option<String>,
    /// Platform identifier used to fetch the bytes.
    pub file_identifier: String,
}

/// Result of inspecting an event for media.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Media(MediaDescriptor),
    /// A document whose type is not on the allow-list.
    Unsupported { name: String, reason: String },
    NoMedia,
}
