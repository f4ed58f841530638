//! Structured observability hooks for scan lifecycle events.
//!
//! This module provides:
//! - A scan-scoped tracing span via [`scan_span`]
//! - Emission functions for task, worker and scan lifecycle events
//!
//! Every event carries an `event` field so log pipelines can filter on it.

use tracing::{debug, info, warn};

use crate::queue::TaskId;

/// Span scoping every event of one scan, including those of its workers.
///
/// # Example
///
/// ```ignore
/// scanner_future.instrument(scan_span("6f1c...")).await;
/// // every event emitted inside carries scan_id = "6f1c..."
/// ```
pub fn scan_span(scan_id: &str) -> tracing::Span {
    tracing::info_span!("sitescan.scan", scan_id = %scan_id)
}

pub fn emit_scan_started(scan_id: &str, routes: usize, tasks: usize, workers: usize) {
    info!(event = "scan.started", scan_id = %scan_id, routes, tasks, workers);
}

pub fn emit_scan_finished(scan_id: &str, duration_ms: u64, succeeded: u64, abandoned: u64) {
    info!(
        event = "scan.finished",
        scan_id = %scan_id,
        duration_ms,
        succeeded,
        abandoned,
    );
}

pub fn emit_worker_started(worker: usize) {
    debug!(event = "worker.started", worker);
}

pub fn emit_worker_stopped(worker: usize, tasks_run: u64) {
    debug!(event = "worker.stopped", worker, tasks_run);
}

pub fn emit_task_started(worker: usize, task: &TaskId, attempt: u32) {
    debug!(event = "task.started", worker, task = %task, attempt);
}

pub fn emit_task_succeeded(task: &TaskId, attempt: u32, duration_ms: u64) {
    info!(event = "task.succeeded", task = %task, attempt, duration_ms);
}

pub fn emit_task_retry_scheduled(task: &TaskId, attempt: u32, delay_ms: u64, error: &dyn std::fmt::Display) {
    warn!(
        event = "task.retry_scheduled",
        task = %task,
        attempt,
        delay_ms,
        error = %error,
    );
}

pub fn emit_task_abandoned(task: &TaskId, attempts: u32, error: &dyn std::fmt::Display) {
    warn!(event = "task.abandoned", task = %task, attempts, error = %error);
}

pub fn emit_route_cancelled(path: &str, queued: usize) {
    info!(event = "route.cancelled", path = %path, queued);
}
