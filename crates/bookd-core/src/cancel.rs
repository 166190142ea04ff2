//! Cooperative cancellation token, generalized from the teacher's
//! `control::JobControl` (`Arc<AtomicBool>` per job) into a standalone type
//! shared by the bypass gateway, fetcher, cascade, and queue.
//!
//! Setting the flag is `O(1)` and non-blocking; observers poll it at
//! suspension points (retry sleeps, countdown waits, chunk reads).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Sleeps in 1-second increments, checking cancellation between ticks, so
    /// a cancel request is observed within one tick rather than after the
    /// full duration (§4.3's cancellation semantics, §5's latency bound).
    pub async fn sleep_cancellable(&self, total: Duration) -> bool {
        let mut remaining = total;
        let tick = Duration::from_secs(1);
        while remaining > Duration::ZERO {
            if self.is_cancelled() {
                return false;
            }
            let step = remaining.min(tick);
            tokio::time::sleep(step).await;
            remaining = remaining.saturating_sub(step);
        }
        !self.is_cancelled()
    }
}
