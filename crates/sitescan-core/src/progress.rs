//! Progress counters for a running scan.
//!
//! Counters are updated silently at the call site. Call
//! [`ScanProgress::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. when the scan finishes).

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Lock-free task counters. `queued` and `running` are gauges; the rest only
/// grow.
#[derive(Debug, Default)]
pub struct ScanProgress {
    queued: AtomicU64,
    running: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    abandoned: AtomicU64,
}

/// Point-in-time copy of [`ScanProgress`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub queued: u64,
    pub running: u64,
    pub succeeded: u64,
    pub retried: u64,
    pub abandoned: u64,
}

impl ProgressSnapshot {
    /// Tasks with a terminal outcome.
    pub fn finished(&self) -> u64 {
        self.succeeded + self.abandoned
    }
}

fn dec(gauge: &AtomicU64) {
    let _ = gauge.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
}

impl ScanProgress {
    pub const fn new() -> Self {
        Self {
            queued: AtomicU64::new(0),
            running: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
        }
    }

    pub fn task_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_started(&self) {
        dec(&self.queued);
        self.running.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_succeeded(&self) {
        dec(&self.running);
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// A running task went back to the queue.
    pub fn task_retried(&self) {
        dec(&self.running);
        self.queued.fetch_add(1, Ordering::Relaxed);
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    /// A task was abandoned, either while running or while still queued.
    pub fn task_abandoned(&self, was_running: bool) {
        if was_running {
            dec(&self.running);
        } else {
            dec(&self.queued);
        }
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "scan.progress",
            queued = s.queued,
            running = s.running,
            succeeded = s.succeeded,
            retried = s.retried,
            abandoned = s.abandoned,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_follow_task_lifecycle() {
        let p = ScanProgress::new();
        p.task_queued();
        p.task_queued();
        p.task_started();
        assert_eq!(p.snapshot().queued, 1);
        assert_eq!(p.snapshot().running, 1);

        p.task_retried();
        p.task_started();
        p.task_succeeded();
        p.task_abandoned(false);

        let s = p.snapshot();
        assert_eq!(
            s,
            ProgressSnapshot {
                queued: 0,
                running: 0,
                succeeded: 1,
                retried: 1,
                abandoned: 1,
            }
        );
        assert_eq!(s.finished(), 2);
    }

    #[test]
    fn gauges_never_underflow() {
        let p = ScanProgress::new();
        p.task_started();
        p.task_succeeded();
        p.task_abandoned(true);
        let s = p.snapshot();
        assert_eq!(s.queued, 0);
        assert_eq!(s.running, 0);
        assert_eq!(s.succeeded, 1);
    }
}
