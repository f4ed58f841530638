//! Retry/backoff controller.
//!
//! Settles every task outcome reported by the worker pool. A failed attempt
//! goes back to the queue after a constant delay until the retry limit is
//! spent; then the task is abandoned and the aggregator is told. Timeouts and
//! engine errors are treated alike. Cancellation abandons immediately.
//!
//! The delay is deliberately constant: audit timing is the measured signal,
//! and a growing backoff would skew comparisons between routes.

use std::sync::Arc;
use std::time::Duration;

use tracing::error;

use crate::aggregator::ResultAggregator;
use crate::config::ClusterConfig;
use crate::error::ScanError;
use crate::obs;
use crate::progress::ScanProgress;
use crate::queue::{Task, TaskQueue, TaskStatus};
use crate::report::AuditReport;

/// What a worker observed while executing a task.
#[derive(Debug)]
pub enum TaskOutcome {
    Succeeded { report: AuditReport, duration: Duration },
    Failed(ScanError),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub limit: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &ClusterConfig) -> Self {
        Self {
            limit: config.retry_limit,
            delay: config.retry_delay(),
        }
    }

    /// Decide what happens to a task whose latest attempt failed with `error`.
    pub fn decide(&self, task: &Task, error: &ScanError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::Abandon(error.clone());
        }
        if task.attempts <= self.limit {
            return RetryDecision::Retry { delay: self.delay };
        }
        RetryDecision::Abandon(ScanError::RetryBudgetExhausted {
            path: task.id.path.clone(),
            sample_index: task.id.sample_index,
            attempts: task.attempts,
            last_error: error.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Abandon(ScanError),
}

/// Applies [`RetryPolicy`] decisions to the queue, aggregator and counters.
pub struct RetryController {
    policy: RetryPolicy,
    queue: Arc<TaskQueue>,
    aggregator: Arc<ResultAggregator>,
    progress: Arc<ScanProgress>,
}

impl RetryController {
    pub fn new(
        policy: RetryPolicy,
        queue: Arc<TaskQueue>,
        aggregator: Arc<ResultAggregator>,
        progress: Arc<ScanProgress>,
    ) -> Self {
        Self {
            policy,
            queue,
            aggregator,
            progress,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Settle a running task.
    pub fn settle(&self, mut task: Task, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Succeeded { report, duration } => {
                task.transition(TaskStatus::Succeeded);
                obs::emit_task_succeeded(&task.id, task.attempts, duration.as_millis() as u64);
                if let Err(e) = self
                    .aggregator
                    .on_task_succeeded(&task.id.path, task.id.sample_index, report)
                {
                    error!(task = %task.id, error = %e, "aggregator rejected report");
                }
                self.progress.task_succeeded();
                self.queue.finish(&task.id);
            }
            TaskOutcome::Failed(err) => {
                task.transition(TaskStatus::Failed);
                match self.policy.decide(&task, &err) {
                    RetryDecision::Retry { delay } => {
                        obs::emit_task_retry_scheduled(&task.id, task.attempts, delay.as_millis() as u64, &err);
                        task.last_error = Some(err);
                        task.transition(TaskStatus::Pending);
                        self.progress.task_retried();
                        self.queue.requeue(task, delay);
                    }
                    RetryDecision::Abandon(final_error) => {
                        task.last_error = Some(err);
                        self.abandon(task, final_error, Stage::Running);
                    }
                }
            }
            TaskOutcome::Cancelled => {
                let err = cancelled(&task);
                self.abandon(task, err, Stage::Running);
            }
        }
    }

    /// Abandon a task drained from the queue when its route left scope.
    pub fn cancel_queued(&self, task: Task) {
        let err = cancelled(&task);
        self.abandon(task, err, Stage::Queued);
    }

    /// Abandon a task a worker dequeued but did not start.
    pub fn cancel_dequeued(&self, task: Task) {
        let err = cancelled(&task);
        self.abandon(task, err, Stage::Dequeued);
    }

    fn abandon(&self, mut task: Task, error: ScanError, stage: Stage) {
        task.transition(TaskStatus::Abandoned);
        obs::emit_task_abandoned(&task.id, task.attempts, &error);
        if let Err(e) = self
            .aggregator
            .on_task_abandoned(&task.id.path, task.id.sample_index, error)
        {
            error!(task = %task.id, error = %e, "aggregator rejected abandonment");
        }
        self.progress.task_abandoned(stage == Stage::Running);
        if stage != Stage::Queued {
            self.queue.finish(&task.id);
        }
    }
}

/// Where a task was when it was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Queued,
    Dequeued,
    Running,
}

fn cancelled(task: &Task) -> ScanError {
    ScanError::Cancelled {
        path: task.id.path.clone(),
        sample_index: task.id.sample_index,
    }
}
