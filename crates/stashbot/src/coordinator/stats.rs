//! Running download totals for `/stats`.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::format;
use crate::transfer::{TransferError, TransferOutcome};

#[derive(Debug, Default)]
pub struct DownloadStats {
    succeeded: AtomicU64,
    failed: AtomicU64,
    bytes: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub bytes: u64,
}

impl DownloadStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one finished transfer. Pages and rejections before any
    /// transfer started are not downloads.
    pub fn observe(&self, result: &Result<TransferOutcome, TransferError>) {
        match result {
            Ok(TransferOutcome::Saved(saved)) => {
                self.succeeded.fetch_add(1, Ordering::Relaxed);
                self.bytes.fetch_add(saved.bytes, Ordering::Relaxed);
            }
            Ok(TransferOutcome::Page { .. }) => {}
            Err(e) if e.is_rejection() => {}
            Err(_) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let succeeded = self.succeeded.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        StatsSnapshot {
            total: succeeded + failed,
            succeeded,
            failed,
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

pub fn stats_text(stats: &StatsSnapshot) -> String {
    format!(
        "📈 Download statistics\nTotal downloads: {}\nSuccessful: {}\nFailed: {}\nTotal size: {}",
        stats.total,
        stats.succeeded,
        stats.failed,
        format::bytes(stats.bytes)
    )
}
