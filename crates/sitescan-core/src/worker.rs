//! Worker pool.
//!
//! A fixed number of workers drain the shared [`TaskQueue`]. Each task gets a
//! fresh audit session, a hard deadline and a cancellation watch for its
//! route; whatever happens, the outcome goes to the [`RetryController`].
//! Workers start one after another, `worker_creation_delay` apart.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, Instrument};

use crate::config::{ClusterConfig, ScanConfig};
use crate::engine::{AuditEngine, AuditOptions, SessionGuard};
use crate::error::{AuditErrorKind, ScanError};
use crate::obs;
use crate::progress::ScanProgress;
use crate::queue::{Task, TaskQueue, TaskStatus};
use crate::retry::{RetryController, TaskOutcome};

/// Routes taken out of scope while the scan runs.
#[derive(Debug)]
pub struct RouteScope {
    cancelled: Mutex<HashSet<String>>,
    changed: watch::Sender<u64>,
}

impl Default for RouteScope {
    fn default() -> Self {
        Self::new()
    }
}

impl RouteScope {
    pub fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            cancelled: Mutex::new(HashSet::new()),
            changed,
        }
    }

    /// Mark `path` cancelled. Returns `false` if it already was.
    pub fn cancel(&self, path: &str) -> bool {
        let inserted = self
            .cancelled
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(path.to_string());
        if inserted {
            self.changed.send_modify(|generation| *generation += 1);
        }
        inserted
    }

    pub fn is_cancelled(&self, path: &str) -> bool {
        self.cancelled
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(path)
    }

    /// Resolve once `path` is cancelled.
    pub async fn wait_cancelled(&self, path: &str) {
        let mut rx = self.changed.subscribe();
        loop {
            if self.is_cancelled(path) {
                return;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }
}

/// Everything a worker needs, shared by all workers of one scan.
pub struct WorkerContext {
    pub config: Arc<ScanConfig>,
    pub engine: Arc<dyn AuditEngine>,
    pub queue: Arc<TaskQueue>,
    pub controller: Arc<RetryController>,
    pub scope: Arc<RouteScope>,
    pub progress: Arc<ScanProgress>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    size: usize,
    stagger: Duration,
}

impl WorkerPool {
    pub fn new(size: usize, stagger: Duration) -> Self {
        Self {
            size: size.max(1),
            stagger,
        }
    }

    pub fn from_config(config: &ClusterConfig) -> Self {
        Self::new(config.max_concurrency, config.worker_creation_delay())
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run workers until the queue is drained. Returns the number of task
    /// attempts executed.
    pub async fn run(&self, ctx: Arc<WorkerContext>) -> u64 {
        let mut workers = JoinSet::new();
        for worker in 0..self.size {
            if worker > 0 {
                if !self.stagger.is_zero() {
                    tokio::time::sleep(self.stagger).await;
                }
                if ctx.queue.is_drained() {
                    break;
                }
            }
            workers.spawn(run_worker(worker, Arc::clone(&ctx)).instrument(tracing::Span::current()));
        }

        let mut attempts = 0;
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(n) => attempts += n,
                Err(e) => error!(error = %e, "worker terminated abnormally"),
            }
        }
        attempts
    }
}

async fn run_worker(worker: usize, ctx: Arc<WorkerContext>) -> u64 {
    obs::emit_worker_started(worker);
    let mut tasks_run = 0;
    while let Some(mut task) = ctx.queue.next().await {
        if ctx.scope.is_cancelled(&task.id.path) {
            ctx.controller.cancel_dequeued(task);
            continue;
        }
        task.transition(TaskStatus::Running);
        ctx.progress.task_started();
        obs::emit_task_started(worker, &task.id, task.attempts);

        let outcome = execute(&ctx, &task).await;
        ctx.controller.settle(task, outcome);
        tasks_run += 1;
    }
    obs::emit_worker_stopped(worker, tasks_run);
    tasks_run
}

/// One attempt: acquire a session, audit under the deadline, release.
async fn execute(ctx: &WorkerContext, task: &Task) -> TaskOutcome {
    let options = AuditOptions::for_route(&ctx.config, &task.route);
    let started = Instant::now();
    let deadline = started + options.timeout;

    let attempt = async {
        let mut session = SessionGuard::acquire(ctx.engine.as_ref()).await?;
        let result = session.audit(&task.route, &options).await;
        session.release().await;
        result
    };

    let path = task.id.path.clone();
    let sample_index = task.id.sample_index;
    tokio::select! {
        biased;
        _ = ctx.scope.wait_cancelled(&task.id.path) => TaskOutcome::Cancelled,
        finished = tokio::time::timeout_at(deadline, AssertUnwindSafe(attempt).catch_unwind()) => {
            match finished {
                Err(_) => TaskOutcome::Failed(ScanError::AuditTimeout {
                    path,
                    sample_index,
                    timeout_ms: options.timeout.as_millis() as u64,
                }),
                Ok(Err(_panic)) => TaskOutcome::Failed(ScanError::AuditEngine {
                    path,
                    sample_index,
                    kind: AuditErrorKind::Internal,
                    message: "audit session panicked".to_string(),
                }),
                Ok(Ok(Err(e))) => TaskOutcome::Failed(ScanError::AuditEngine {
                    path,
                    sample_index,
                    kind: e.kind,
                    message: e.message,
                }),
                Ok(Ok(Ok(report))) => TaskOutcome::Succeeded {
                    report,
                    duration: started.elapsed(),
                },
            }
        }
    }
}
