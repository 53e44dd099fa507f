//! In-process fakes for the gateway seams.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use stashbot_gateway_protocol::{
    ByteStream, FetchError, MessageHandle, MediaSource, ReplySink, SendError,
};

// ============================================================================
// RecordingSink
// ============================================================================

#[derive(Debug, Clone)]
pub enum Sent {
    Reply { conversation_id: String, text: String },
    Edit { message_id: String, text: String },
}

/// Reply sink that records everything and can simulate flood control.
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<Sent>>,
    next_id: AtomicU64,
    rate_limits: Mutex<VecDeque<Duration>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call fail with a rate-limit signal.
    pub fn rate_limit_next(&self, wait: Duration) {
        self.rate_limits.lock().unwrap().push_back(wait);
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn replies(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Reply { text, .. } => Some(text),
                Sent::Edit { .. } => None,
            })
            .collect()
    }

    pub fn edits(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Edit { text, .. } => Some(text),
                Sent::Reply { .. } => None,
            })
            .collect()
    }

    /// Every text sent or edited, in order.
    pub fn texts(&self) -> Vec<String> {
        self.sent()
            .into_iter()
            .map(|s| match s {
                Sent::Reply { text, .. } | Sent::Edit { text, .. } => text,
            })
            .collect()
    }

    pub fn any_text_contains(&self, needle: &str) -> bool {
        self.texts().iter().any(|t| t.contains(needle))
    }

    fn take_rate_limit(&self) -> Option<Duration> {
        self.rate_limits.lock().unwrap().pop_front()
    }
}

#[async_trait]
impl ReplySink for RecordingSink {
    async fn reply(&self, conversation_id: &str, text: &str) -> Result<MessageHandle, SendError> {
        if let Some(wait) = self.take_rate_limit() {
            return Err(SendError::RateLimited(wait));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.sent.lock().unwrap().push(Sent::Reply {
            conversation_id: conversation_id.to_string(),
            text: text.to_string(),
        });
        Ok(MessageHandle {
            conversation_id: conversation_id.to_string(),
            message_id: id,
        })
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<(), SendError> {
        if let Some(wait) = self.take_rate_limit() {
            return Err(SendError::RateLimited(wait));
        }
        self.sent.lock().unwrap().push(Sent::Edit {
            message_id: handle.message_id.clone(),
            text: text.to_string(),
        });
        Ok(())
    }
}

// ============================================================================
// FakeMediaSource
// ============================================================================

/// Scripted behaviour for one `open` call.
#[derive(Clone)]
pub enum FakeFile {
    /// Serve these chunks, pausing `delay` before each.
    Chunks { chunks: Vec<Bytes>, delay: Duration },
    /// Serve the chunks, then fail the stream.
    Truncated(Vec<Bytes>),
    /// Fail to open.
    OpenError(fn() -> FetchError),
    /// Open, then never yield a byte.
    Stall,
}

impl FakeFile {
    pub fn bytes(data: &[u8]) -> Self {
        FakeFile::Chunks {
            chunks: data.chunks(4096).map(Bytes::copy_from_slice).collect(),
            delay: Duration::ZERO,
        }
    }

    pub fn slow(data: &[u8], delay: Duration) -> Self {
        FakeFile::Chunks {
            chunks: data.chunks(4096).map(Bytes::copy_from_slice).collect(),
            delay,
        }
    }
}

/// Media source serving scripted files.
///
/// Each file identifier holds a queue of behaviours; every `open` consumes
/// one, and the last one repeats.
#[derive(Default)]
pub struct FakeMediaSource {
    files: Mutex<HashMap<String, VecDeque<FakeFile>>>,
    opens: Mutex<Vec<String>>,
}

impl FakeMediaSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, file_identifier: &str, script: Vec<FakeFile>) -> Self {
        self.files
            .lock()
            .unwrap()
            .insert(file_identifier.to_string(), script.into());
        self
    }

    pub fn set_file(&self, file_identifier: &str, script: Vec<FakeFile>) {
        self.files
            .lock()
            .unwrap()
            .insert(file_identifier.to_string(), script.into());
    }

    pub fn open_count(&self, file_identifier: &str) -> usize {
        self.opens
            .lock()
            .unwrap()
            .iter()
            .filter(|id| *id == file_identifier)
            .count()
    }

    fn next_behaviour(&self, file_identifier: &str) -> Option<FakeFile> {
        let mut files = self.files.lock().unwrap();
        let queue = files.get_mut(file_identifier)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

#[async_trait]
impl MediaSource for FakeMediaSource {
    async fn open(&self, file_identifier: &str) -> Result<ByteStream, FetchError> {
        self.opens.lock().unwrap().push(file_identifier.to_string());
        let behaviour = self
            .next_behaviour(file_identifier)
            .ok_or_else(|| FetchError::Unavailable(format!("no such file: {}", file_identifier)))?;

        match behaviour {
            FakeFile::Chunks { chunks, delay } => Ok(futures::stream::iter(chunks)
                .then(move |chunk| async move {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    Ok(chunk)
                })
                .boxed()),
            FakeFile::Truncated(chunks) => {
                let items: Vec<Result<Bytes, FetchError>> = chunks
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(FetchError::Transport(
                        "connection reset".to_string(),
                    ))))
                    .collect();
                Ok(futures::stream::iter(items).boxed())
            }
            FakeFile::OpenError(make) => Err(make()),
            FakeFile::Stall => Ok(futures::stream::pending().boxed()),
        }
    }
}

// ============================================================================
// Sync tool
// ============================================================================

/// Write a sync tool into `dir` that sleeps `seconds` and then succeeds.
#[cfg(unix)]
pub fn slow_sync_tool(dir: &Path, seconds: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("slow-sync");
    std::fs::write(&path, format!("#!/bin/sh\nsleep {}\n", seconds)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}
