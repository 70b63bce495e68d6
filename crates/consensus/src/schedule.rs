//! Cancellable handles for background loops
//!
//! The slot timer, pool sweep, early-proposal sweep, and deferred-work tick
//! all run as fire-and-forget tasks owned by one of these handles. Errors
//! inside a task are the task's problem; the loop continues.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Handle to a named background loop
pub struct ScheduleHandle {
    name: &'static str,
    cancelled: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl ScheduleHandle {
    /// Spawn a custom loop; the closure receives the cancellation flag and
    /// is expected to re-arm itself until the flag flips
    pub fn spawn<F, Fut>(name: &'static str, f: F) -> Self
    where
        F: FnOnce(Arc<AtomicBool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancelled = Arc::new(AtomicBool::new(false));
        let handle = tokio::spawn(f(cancelled.clone()));
        tracing::debug!("Spawned background loop '{}'", name);
        Self {
            name,
            cancelled,
            handle,
        }
    }

    /// Spawn a fixed-period loop running a synchronous task each tick
    pub fn every<F>(name: &'static str, period: Duration, task: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        Self::spawn(name, move |cancelled| async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if cancelled.load(Ordering::SeqCst) {
                    break;
                }
                task();
            }
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the loop; safe to call more than once
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.handle.abort();
        tracing::debug!("Cancelled background loop '{}'", self.name);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
