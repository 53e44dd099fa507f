//! Transfer executor.
//!
//! Runs one [`TransferTask`] to completion: size pre-check, streaming with
//! throttled progress, read-back verification, and a bounded retry loop for
//! transient failures. The whole run sits under one wall-clock timeout, and
//! every failure path removes the partial file before returning.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use reqwest::header::CONTENT_TYPE;
use stashbot_gateway_protocol::MediaSource;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

use super::progress::{ProgressEmitter, ProgressSink};
use super::verify::verify_file;
use super::{SavedFile, SourceRef, TransferError, TransferOutcome, TransferSettings, TransferTask};
use crate::flood::FloodGate;
use crate::scrape::LinkExtractor;

pub struct TransferExecutor {
    settings: TransferSettings,
    media: Arc<dyn MediaSource>,
    http: reqwest::Client,
    links: Arc<dyn LinkExtractor>,
    flood: FloodGate,
}

impl TransferExecutor {
    pub fn new(
        settings: TransferSettings,
        media: Arc<dyn MediaSource>,
        http: reqwest::Client,
        links: Arc<dyn LinkExtractor>,
        flood: FloodGate,
    ) -> Self {
        Self {
            settings,
            media,
            http,
            links,
            flood,
        }
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    /// Run a task. The task ends `Completed` or `Failed`.
    pub async fn execute(
        &self,
        task: &mut TransferTask,
        progress: &dyn ProgressSink,
    ) -> Result<TransferOutcome, TransferError> {
        if let Some(size) = task.byte_size {
            if size > self.settings.max_bytes {
                info!(
                    task = %task.id,
                    size,
                    limit = self.settings.max_bytes,
                    "Rejecting oversized transfer"
                );
                task.mark_failed();
                return Err(TransferError::SizeExceeded {
                    size,
                    limit: self.settings.max_bytes,
                });
            }
        }

        task.mark_in_progress();
        debug!(task = %task.id, path = %task.target_path.display(), "Transfer started");

        let result = match self.settings.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.attempts(task, progress)).await {
                Ok(result) => result,
                Err(_) => Err(TransferError::Timeout(limit)),
            },
            None => self.attempts(task, progress).await,
        };

        match result {
            Ok(outcome) => {
                task.mark_completed();
                Ok(outcome)
            }
            Err(e) => {
                remove_partial(&task.target_path).await;
                task.mark_failed();
                warn!(task = %task.id, label = %task.label, error = %e, "Transfer failed");
                Err(e)
            }
        }
    }

    async fn attempts(
        &self,
        task: &mut TransferTask,
        progress: &dyn ProgressSink,
    ) -> Result<TransferOutcome, TransferError> {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.attempt(task, progress).await {
                Ok(outcome) => return Ok(outcome),
                Err(TransferError::RateLimited(wait)) => {
                    remove_partial(&task.target_path).await;
                    // Sitting out flood control is not a failed attempt.
                    self.flood.wait(task.conversation_id(), wait).await;
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    remove_partial(&task.target_path).await;
                    warn!(
                        task = %task.id,
                        attempt,
                        max_attempts,
                        error = %e,
                        "Transfer attempt failed, retrying"
                    );
                    progress.retrying(attempt + 1, max_attempts, &e).await;
                    tokio::time::sleep(backoff(self.settings.retry_delay, attempt)).await;
                    attempt += 1;
                    task.retry_count += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(
        &self,
        task: &TransferTask,
        progress: &dyn ProgressSink,
    ) -> Result<TransferOutcome, TransferError> {
        let started = Instant::now();
        let bytes = match &task.source {
            SourceRef::Platform {
                file_identifier, ..
            } => {
                let stream = self.media.open(file_identifier).await?;
                let stream = stream.map(|chunk| chunk.map_err(TransferError::from));
                self.write_stream(stream, &task.target_path, task.byte_size, progress)
                    .await?
            }
            SourceRef::Url { url, .. } => {
                let response = self.request(url).await?;
                if is_html(&response) {
                    let body = response.text().await?;
                    let links = self.links.extract(url, &body);
                    debug!(
                        task = %task.id,
                        url = %url,
                        links = links.len(),
                        "Page scanned for media links"
                    );
                    return Ok(TransferOutcome::Page { links });
                }
                self.save_response(response, task, progress).await?
            }
        };

        let bytes = verify_file(&task.target_path, bytes).await?;
        let elapsed = started.elapsed();
        info!(
            task = %task.id,
            path = %task.target_path.display(),
            bytes,
            elapsed_ms = elapsed.as_millis() as u64,
            "Transfer complete"
        );
        Ok(TransferOutcome::Saved(SavedFile {
            path: task.target_path.clone(),
            bytes,
            elapsed,
        }))
    }

    async fn request(&self, url: &Url) -> Result<reqwest::Response, TransferError> {
        let response = self.http.get(url.clone()).send().await?;
        let status = response.status();
        if status.is_server_error() {
            return Err(TransferError::ServerError {
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            return Err(TransferError::Unknown(format!("HTTP {} from {}", status, url)));
        }
        Ok(response)
    }

    async fn save_response(
        &self,
        response: reqwest::Response,
        task: &TransferTask,
        progress: &dyn ProgressSink,
    ) -> Result<u64, TransferError> {
        let declared = response.content_length().filter(|len| *len > 0);
        if let Some(size) = declared {
            if size > self.settings.max_bytes {
                return Err(TransferError::SizeExceeded {
                    size,
                    limit: self.settings.max_bytes,
                });
            }
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(TransferError::from));
        self.write_stream(stream, &task.target_path, declared, progress)
            .await
    }

    /// Write a byte stream to `path`, enforcing the size ceiling and the
    /// declared length. Returns the number of bytes written.
    async fn write_stream<S>(
        &self,
        stream: S,
        path: &Path,
        declared: Option<u64>,
        progress: &dyn ProgressSink,
    ) -> Result<u64, TransferError>
    where
        S: Stream<Item = Result<Bytes, TransferError>>,
    {
        let mut stream = std::pin::pin!(stream);
        let file = fs::File::create(path).await?;
        let mut writer = BufWriter::with_capacity(self.settings.chunk_size, file);
        let mut emitter = ProgressEmitter::new(self.settings.progress_interval);
        let mut received: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(TransferError::RateLimited(wait)) => {
                    return Err(TransferError::RateLimited(wait));
                }
                Err(e) => {
                    return match declared {
                        Some(expected) => {
                            debug!(error = %e, received, expected, "Stream ended early");
                            Err(TransferError::Incomplete { expected, received })
                        }
                        None => Err(e),
                    };
                }
            };

            received += chunk.len() as u64;
            if received > self.settings.max_bytes {
                return Err(TransferError::SizeExceeded {
                    size: received,
                    limit: self.settings.max_bytes,
                });
            }
            writer.write_all(&chunk).await?;

            if let Some(update) = emitter.observe(received, declared) {
                progress.report(update).await;
            }
        }
        writer.flush().await?;

        if let Some(expected) = declared {
            if received != expected {
                return Err(TransferError::Incomplete { expected, received });
            }
        }

        progress.report(emitter.finish(received, declared)).await;
        Ok(received)
    }
}

fn is_html(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().to_ascii_lowercase().starts_with("text/html"))
}

async fn remove_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed partial file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove partial file"),
    }
}

/// Linear backoff between attempts.
fn backoff(base: Duration, attempt: u32) -> Duration {
    base * attempt
}

// ============================================================================
// Tests
// ============================================================================
