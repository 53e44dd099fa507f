//! Platform media downloads.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use thiserror::Error;

/// Stream of attachment bytes in arrival order.
pub type ByteStream = BoxStream<'static, Result<Bytes, FetchError>>;

/// Errors returned while opening or reading a platform file.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Flood control; retry after the given wait.
    #[error("rate limited (retry after {}s)", .0.as_secs())]
    RateLimited(Duration),

    /// The file host answered with a 5xx status.
    #[error("file server error (status {0})")]
    Server(u16),

    /// The platform does not know the file or refused to serve it.
    #[error("file unavailable: {0}")]
    Unavailable(String),

    /// Connection dropped or another transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Opens attachment byte streams by file identifier.
#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn open(&self, file_identifier: &str) -> Result<ByteStream, FetchError>;
}
