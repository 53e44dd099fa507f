//! Progress reporting with an explicit rate limit.
//!
//! The executor feeds every chunk into a [`ProgressEmitter`], which only lets
//! an update through when the configured interval has passed since the last
//! one, plus once more when the transfer completes. This keeps status edits
//! well below platform flood thresholds.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::TransferError;

/// Snapshot of a running transfer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressUpdate {
    pub bytes: u64,
    /// Declared total, when known.
    pub total: Option<u64>,
    pub elapsed: Duration,
    pub done: bool,
}

impl ProgressUpdate {
    pub fn percent(&self) -> Option<f64> {
        match self.total {
            Some(total) if total > 0 => Some(self.bytes as f64 / total as f64 * 100.0),
            _ => None,
        }
    }

    /// Average speed in bytes per second.
    pub fn speed(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 { self.bytes as f64 / secs } else { 0.0 }
    }

    pub fn eta(&self) -> Option<Duration> {
        let total = self.total?;
        let speed = self.speed();
        if speed <= 0.0 || total < self.bytes {
            return None;
        }
        Some(Duration::from_secs_f64((total - self.bytes) as f64 / speed))
    }
}

/// Receives progress for a single transfer.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, update: ProgressUpdate);

    /// Called before the executor re-attempts after a transient failure.
    async fn retrying(&self, _attempt: u32, _max_attempts: u32, _error: &TransferError) {}
}

/// Sink that drops everything.
pub struct NoProgress;

#[async_trait]
impl ProgressSink for NoProgress {
    async fn report(&self, _update: ProgressUpdate) {}
}

/// Decides which progress observations are worth reporting.
#[derive(Debug)]
pub struct ProgressEmitter {
    interval: Duration,
    started: Instant,
    last_emit: Instant,
}

impl ProgressEmitter {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    pub fn starting_at(interval: Duration, started: Instant) -> Self {
        Self {
            interval,
            started,
            last_emit: started,
        }
    }

    pub fn observe(&mut self, bytes: u64, total: Option<u64>) -> Option<ProgressUpdate> {
        self.observe_at(bytes, total, Instant::now())
    }

    /// Returns an update when at least `interval` passed since the last one.
    pub fn observe_at(
        &mut self,
        bytes: u64,
        total: Option<u64>,
        now: Instant,
    ) -> Option<ProgressUpdate> {
        if now.saturating_duration_since(self.last_emit) < self.interval {
            return None;
        }
        self.last_emit = now;
        Some(ProgressUpdate {
            bytes,
            total,
            elapsed: now.saturating_duration_since(self.started),
            done: false,
        })
    }

    pub fn finish(&mut self, bytes: u64, total: Option<u64>) -> ProgressUpdate {
        self.finish_at(bytes, total, Instant::now())
    }

    /// Completion is always reported.
    pub fn finish_at(&mut self, bytes: u64, total: Option<u64>, now: Instant) -> ProgressUpdate {
        self.last_emit = now;
        ProgressUpdate {
            bytes,
            total,
            elapsed: now.saturating_duration_since(self.started),
            done: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emits_only_after_interval() {
        let start = Instant::now();
        let mut emitter = ProgressEmitter::starting_at(Duration::from_secs(2), start);

        assert!(emitter.observe_at(10, Some(100), start).is_none());
        assert!(
            emitter
                .observe_at(20, Some(100), start + Duration::from_millis(1999))
                .is_none()
        );

        let update = emitter
            .observe_at(30, Some(100), start + Duration::from_secs(2))
            .unwrap();
        assert_eq!(update.bytes, 30);
        assert_eq!(update.elapsed, Duration::from_secs(2));
        assert!(!update.done);

        // Interval restarts from the last emit.
        assert!(
            emitter
                .observe_at(40, Some(100), start + Duration::from_secs(3))
                .is_none()
        );
        assert!(
            emitter
                .observe_at(50, Some(100), start + Duration::from_secs(4))
                .is_some()
        );
    }

    #[test]
    fn finish_always_emits() {
        let start = Instant::now();
        let mut emitter = ProgressEmitter::starting_at(Duration::from_secs(60), start);

        let update = emitter.finish_at(100, Some(100), start + Duration::from_millis(5));
        assert!(update.done);
        assert_eq!(update.bytes, 100);
    }

    #[test]
    fn update_math() {
        let update = ProgressUpdate {
            bytes: 50,
            total: Some(200),
            elapsed: Duration::from_secs(5),
            done: false,
        };
        assert_eq!(update.percent(), Some(25.0));
        assert_eq!(update.speed(), 10.0);
        assert_eq!(update.eta(), Some(Duration::from_secs(15)));
    }

    #[test]
    fn update_math_without_total() {
        let update = ProgressUpdate {
            bytes: 50,
            total: None,
            elapsed: Duration::ZERO,
            done: false,
        };
        assert_eq!(update.percent(), None);
        assert_eq!(update.speed(), 0.0);
        assert_eq!(update.eta(), None);
    }
}
