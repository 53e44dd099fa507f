//! System-wide admission control for transfers.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Error)]
#[error("concurrency limiter is closed")]
pub struct LimiterClosed;

/// Counting gate with a fixed number of transfer slots.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held slot. Dropping it releases the slot exactly once, whether the
/// guarded work returned, failed, panicked or was cancelled.
#[derive(Debug)]
pub struct TransferSlot {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot. Waiters are admitted in arrival order.
    pub async fn acquire(&self) -> Result<TransferSlot, LimiterClosed> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| LimiterClosed)?;
        Ok(TransferSlot { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn in_flight(&self) -> usize {
        self.capacity - self.available().min(self.capacity)
    }
}
