//! Transfer errors.

use std::fmt;
use std::time::Duration;

use stashbot_gateway_protocol::FetchError;
use thiserror::Error;

/// Errors that end a transfer attempt.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Declared or received size is over the configured ceiling.
    #[error("file too large: {size} bytes exceeds the {limit} byte limit")]
    SizeExceeded { size: u64, limit: u64 },

    /// Byte count at stream end differs from the declared length.
    #[error("incomplete download: expected {expected} bytes, got {received} bytes")]
    Incomplete { expected: u64, received: u64 },

    /// The written file failed the read-back check.
    #[error("downloaded file failed verification: {0}")]
    Corrupt(String),

    /// Upstream answered with a 5xx status.
    #[error("server error (status {status})")]
    ServerError { status: u16 },

    /// The whole transfer exceeded its wall-clock budget.
    #[error("transfer timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Platform flood control. Converted into a cool-down, never reported.
    #[error("rate limited (retry after {}s)", .0.as_secs())]
    RateLimited(Duration),

    /// Media kind not recognized or not allowed.
    #[error("unsupported media: {0}")]
    Unsupported(String),

    #[error("{0}")]
    Unknown(String),
}

impl TransferError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransferError::SizeExceeded { .. } => ErrorKind::SizeExceeded,
            TransferError::Incomplete { .. } => ErrorKind::Incomplete,
            TransferError::Corrupt(_) => ErrorKind::Corrupt,
            TransferError::ServerError { .. } => ErrorKind::ServerError,
            TransferError::Timeout(_) => ErrorKind::Timeout,
            TransferError::RateLimited(_) => ErrorKind::RateLimited,
            TransferError::Unsupported(_) => ErrorKind::Unsupported,
            TransferError::Unknown(_) => ErrorKind::Unknown,
        }
    }

    /// Whether another attempt inside the executor may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TransferError::Incomplete { .. }
                | TransferError::Corrupt(_)
                | TransferError::ServerError { .. }
                | TransferError::Unknown(_)
        )
    }

    /// Rejected up front: not a failed attempt, so never worth a retry.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            TransferError::SizeExceeded { .. } | TransferError::Unsupported(_)
        )
    }

    /// Text for the operator, friendlier than `Display` for a few kinds.
    pub fn user_message(&self) -> String {
        match self {
            TransferError::ServerError { status } => {
                format!("Server error ({}). Try again later.", status)
            }
            TransferError::SizeExceeded { size, limit } => format!(
                "File too large ({}). Maximum is {}.",
                crate::format::bytes(*size),
                crate::format::bytes(*limit)
            ),
            TransferError::Timeout(limit) => format!(
                "Download timed out after {}.",
                crate::format::duration(*limit)
            ),
            other => other.to_string(),
        }
    }
}

impl From<FetchError> for TransferError {
    fn from(e: FetchError) -> Self {
        match e {
            FetchError::RateLimited(wait) => TransferError::RateLimited(wait),
            FetchError::Server(status) => TransferError::ServerError { status },
            FetchError::Unavailable(msg) => {
                TransferError::Unknown(format!("file unavailable: {}", msg))
            }
            FetchError::Transport(msg) => {
                TransferError::Unknown(format!("transport error: {}", msg))
            }
        }
    }
}

impl From<std::io::Error> for TransferError {
    fn from(e: std::io::Error) -> Self {
        TransferError::Unknown(format!("io error: {}", e))
    }
}

impl From<reqwest::Error> for TransferError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) if status.is_server_error() => TransferError::ServerError {
                status: status.as_u16(),
            },
            _ => TransferError::Unknown(format!("http error: {}", e)),
        }
    }
}

/// Tag of a [`TransferError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SizeExceeded,
    Incomplete,
    Corrupt,
    ServerError,
    Timeout,
    RateLimited,
    Unsupported,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::SizeExceeded => "size_exceeded",
            ErrorKind::Incomplete => "incomplete",
            ErrorKind::Corrupt => "corrupt",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
