//! Warmup-state cache
//!
//! Hosts that gate traffic on an expensive readiness probe can cache the
//! result here. The tracker holds a single ready flag; an optional periodic
//! reset marks the cached state stale so the next observer re-runs its
//! probe, without cancelling anything in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default interval after which a cached ready state goes stale
pub const DEFAULT_RESET_INTERVAL: Duration = Duration::from_secs(15);

/// Cached ready flag with optional periodic staleness reset
#[derive(Debug)]
pub struct WarmupTracker {
    ready: Arc<AtomicBool>,
    reset_task: Option<JoinHandle<()>>,
}

impl WarmupTracker {
    /// Tracker with no reset timer; the flag only changes explicitly
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(false)),
            reset_task: None,
        }
    }

    /// Tracker whose flag is reset to stale on the given interval.
    /// Must be called within a tokio runtime.
    pub fn with_reset(interval: Duration) -> Self {
        let ready = Arc::new(AtomicBool::new(false));
        let flag = ready.clone();
        let reset_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if flag.swap(false, Ordering::SeqCst) {
                    debug!("warmup state marked stale");
                }
            }
        });
        Self {
            ready,
            reset_task: Some(reset_task),
        }
    }

    /// Record that warmup completed
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Whether the cached state is still ready
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

impl Default for WarmupTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WarmupTracker {
    fn drop(&mut self) {
        if let Some(task) = self.reset_task.take() {
            task.abort();
        }
    }
}
