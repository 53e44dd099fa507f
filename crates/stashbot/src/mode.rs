//! Operating mode switches.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::info;

/// Download mode and the sync-in-progress flag, each behind its own lock.
#[derive(Debug, Clone, Default)]
pub struct ModeGate {
    download_active: Arc<Mutex<bool>>,
    sync_in_progress: Arc<Mutex<bool>>,
}

/// Holds the sync flag. Dropping it clears the flag.
#[derive(Debug)]
pub struct SyncGuard {
    flag: Arc<Mutex<bool>>,
}

impl Drop for SyncGuard {
    fn drop(&mut self) {
        *lock(&self.flag) = false;
        info!("Sync finished, flag released");
    }
}

impl ModeGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Turn download mode on. Returns `false` if it already was.
    pub fn activate_download(&self) -> bool {
        let mut active = lock(&self.download_active);
        let changed = !*active;
        *active = true;
        changed
    }

    /// Turn download mode off. Returns `false` if it already was.
    pub fn deactivate_download(&self) -> bool {
        let mut active = lock(&self.download_active);
        let changed = *active;
        *active = false;
        changed
    }

    pub fn is_download_active(&self) -> bool {
        *lock(&self.download_active)
    }

    /// Claim the sync flag, or `None` when a sync is already running.
    pub fn try_begin_sync(&self) -> Option<SyncGuard> {
        let mut running = lock(&self.sync_in_progress);
        if *running {
            return None;
        }
        *running = true;
        Some(SyncGuard {
            flag: self.sync_in_progress.clone(),
        })
    }

    pub fn is_sync_in_progress(&self) -> bool {
        *lock(&self.sync_in_progress)
    }
}

/// A panic while holding a flag leaves a plain bool behind; keep using it.
fn lock(flag: &Mutex<bool>) -> MutexGuard<'_, bool> {
    flag.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
