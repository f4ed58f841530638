//! Task queue shared by the worker pool.
//!
//! Tasks are served FIFO among those whose not-before time has passed. A
//! requeued task goes to the back, so a flaky route never jumps ahead of work
//! that was queued before it. Every mutation is one short critical section
//! under a std mutex; nothing is held across an await.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::ScanError;
use crate::route::Route;

/// Identity of a task: one sample of one route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId {
    pub path: String,
    pub sample_index: u32,
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.path, self.sample_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Abandoned,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Abandoned)
    }

    /// Legal edges of the per-task state machine.
    fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Abandoned)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Abandoned)
                | (Failed, Pending)
                | (Failed, Abandoned)
        )
    }
}

/// One scheduled sample attempt.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub route: Arc<Route>,
    /// Number of times the task has been started.
    pub attempts: u32,
    pub status: TaskStatus,
    pub last_error: Option<ScanError>,
    pub scheduled_at: DateTime<Utc>,
    not_before: Instant,
}

impl Task {
    pub fn new(route: Arc<Route>, sample_index: u32) -> Self {
        Self {
            id: TaskId {
                path: route.path.clone(),
                sample_index,
            },
            route,
            attempts: 0,
            status: TaskStatus::Pending,
            last_error: None,
            scheduled_at: Utc::now(),
            not_before: Instant::now(),
        }
    }

    /// Move along the state machine. Illegal edges are ignored and reported.
    pub fn transition(&mut self, next: TaskStatus) -> bool {
        if self.status.can_transition_to(next) {
            if next == TaskStatus::Running {
                self.attempts += 1;
            }
            self.status = next;
            true
        } else {
            tracing::warn!(task = %self.id, from = ?self.status, to = ?next, "illegal task transition");
            false
        }
    }

    pub fn is_ready(&self, now: Instant) -> bool {
        self.not_before <= now
    }

    pub fn not_before(&self) -> Instant {
        self.not_before
    }
}

/// Result of a non-blocking dequeue.
#[derive(Debug)]
pub enum Dequeue {
    Ready(Task),
    /// Pending tasks exist but none is ready before the given instant.
    NotReady(Instant),
    Empty,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<Task>,
    /// Ids of queued or in-flight tasks, for duplicate coalescing.
    tracked: HashSet<TaskId>,
    in_flight: usize,
}

/// Ordered backlog of tasks, shared by all workers.
#[derive(Debug)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    skip_duplicates: bool,
}

impl TaskQueue {
    pub fn new(skip_duplicates: bool) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            skip_duplicates,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a task. Returns `false` if it was coalesced into an identical
    /// queued or in-flight task (only when duplicate skipping is on).
    pub fn enqueue(&self, task: Task) -> bool {
        {
            let mut state = self.lock();
            if !state.tracked.insert(task.id.clone()) && self.skip_duplicates {
                tracing::debug!(task = %task.id, "coalesced duplicate task");
                return false;
            }
            state.pending.push_back(task);
        }
        self.notify.notify_waiters();
        true
    }

    /// Take the first ready task, if any.
    pub fn dequeue(&self) -> Dequeue {
        let mut state = self.lock();
        Self::take_ready(&mut state, Instant::now())
    }

    fn take_ready(state: &mut QueueState, now: Instant) -> Dequeue {
        let position = state.pending.iter().position(|t| t.is_ready(now));
        if let Some(task) = position.and_then(|pos| state.pending.remove(pos)) {
            state.in_flight += 1;
            return Dequeue::Ready(task);
        }
        match state.pending.iter().map(Task::not_before).min() {
            Some(at) => Dequeue::NotReady(at),
            None => Dequeue::Empty,
        }
    }

    /// Id of the task [`dequeue`](Self::dequeue) would return now.
    pub fn peek(&self) -> Option<TaskId> {
        let now = Instant::now();
        let state = self.lock();
        state
            .pending
            .iter()
            .find(|t| t.is_ready(now))
            .map(|t| t.id.clone())
    }

    /// Return an in-flight task to the back of the queue, not ready until
    /// `delay` has elapsed.
    pub fn requeue(&self, mut task: Task, delay: Duration) {
        task.not_before = Instant::now() + delay;
        task.scheduled_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
        {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.pending.push_back(task);
        }
        self.notify.notify_waiters();
    }

    /// Record that an in-flight task reached a terminal state.
    pub fn finish(&self, id: &TaskId) {
        {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.tracked.remove(id);
        }
        self.notify.notify_waiters();
    }

    /// Remove every queued (not in-flight) task of `path`.
    pub fn drain_route(&self, path: &str) -> Vec<Task> {
        let drained: Vec<Task> = {
            let mut state = self.lock();
            let (drained, kept): (VecDeque<Task>, VecDeque<Task>) =
                state.pending.drain(..).partition(|t| t.id.path == path);
            state.pending = kept;
            for task in &drained {
                state.tracked.remove(&task.id);
            }
            drained.into_iter().collect()
        };
        self.notify.notify_waiters();
        drained
    }

    /// Wait for the next ready task.
    ///
    /// Returns `None` once the queue is empty and nothing is in flight, since
    /// no task can appear after that point.
    pub async fn next(&self) -> Option<Task> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wake_at = {
                let mut state = self.lock();
                match Self::take_ready(&mut state, Instant::now()) {
                    Dequeue::Ready(task) => return Some(task),
                    Dequeue::NotReady(at) => Some(at),
                    Dequeue::Empty if state.in_flight == 0 => return None,
                    Dequeue::Empty => None,
                }
            };

            match wake_at {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    pub fn is_drained(&self) -> bool {
        let state = self.lock();
        state.pending.is_empty() && state.in_flight == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::DiscoverySource;

    fn task(path: &str, sample_index: u32) -> Task {
        Task::new(Arc::new(Route::new(path, DiscoverySource::Manual)), sample_index)
    }

    fn expect_ready(queue: &TaskQueue) -> Task {
        match queue.dequeue() {
            Dequeue::Ready(task) => task,
            other => panic!("expected a ready task, got {other:?}"),
        }
    }

    #[test]
    fn test_state_machine_edges() {
        let mut t = task("/a", 0);
        assert!(!t.transition(TaskStatus::Succeeded));
        assert!(t.transition(TaskStatus::Running));
        assert_eq!(t.attempts, 1);
        assert!(t.transition(TaskStatus::Failed));
        assert!(t.transition(TaskStatus::Pending));
        assert!(t.transition(TaskStatus::Running));
        assert_eq!(t.attempts, 2);
        assert!(t.transition(TaskStatus::Succeeded));
        assert!(t.status.is_terminal());
        assert!(!t.transition(TaskStatus::Pending));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_among_ready_tasks() {
        let queue = TaskQueue::new(false);
        queue.enqueue(task("/a", 0));
        queue.enqueue(task("/b", 0));
        queue.enqueue(task("/c", 0));

        assert_eq!(queue.peek().unwrap().path, "/a");
        assert_eq!(expect_ready(&queue).id.path, "/a");
        assert_eq!(expect_ready(&queue).id.path, "/b");
        assert_eq!(expect_ready(&queue).id.path, "/c");
        assert_eq!(queue.in_flight(), 3);
        assert!(matches!(queue.dequeue(), Dequeue::Empty));
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeued_task_waits_and_does_not_jump_ahead() {
        let queue = TaskQueue::new(false);
        queue.enqueue(task("/flaky", 0));
        queue.enqueue(task("/b", 0));

        let flaky = expect_ready(&queue);
        queue.requeue(flaky, Duration::from_millis(2000));

        // /b was queued first and is ready; the retry is not.
        assert_eq!(expect_ready(&queue).id.path, "/b");
        assert!(matches!(queue.dequeue(), Dequeue::NotReady(_)));
        assert!(queue.peek().is_none());

        tokio::time::advance(Duration::from_millis(2000)).await;
        assert_eq!(expect_ready(&queue).id.path, "/flaky");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_goes_behind_fresh_tasks_of_other_routes() {
        let queue = TaskQueue::new(false);
        queue.enqueue(task("/flaky", 0));
        queue.enqueue(task("/b", 0));
        queue.enqueue(task("/c", 0));

        let flaky = expect_ready(&queue);
        queue.requeue(flaky, Duration::ZERO);

        let order: Vec<String> = (0..3).map(|_| expect_ready(&queue).id.path).collect();
        assert_eq!(order, vec!["/b", "/c", "/flaky"]);
    }

    #[tokio::test]
    async fn test_duplicate_tasks_coalesced_only_when_configured() {
        let skipping = TaskQueue::new(true);
        assert!(skipping.enqueue(task("/a", 0)));
        assert!(!skipping.enqueue(task("/a", 0)));
        assert!(skipping.enqueue(task("/a", 1)));
        assert_eq!(skipping.pending(), 2);

        // still coalesced while in flight
        let running = expect_ready(&skipping);
        assert!(!skipping.enqueue(task("/a", 0)));
        skipping.finish(&running.id);
        assert!(skipping.enqueue(task("/a", 0)));

        let allowing = TaskQueue::new(false);
        assert!(allowing.enqueue(task("/a", 0)));
        assert!(allowing.enqueue(task("/a", 0)));
        assert_eq!(allowing.pending(), 2);
    }

    #[tokio::test]
    async fn test_drain_route_removes_only_that_route() {
        let queue = TaskQueue::new(false);
        queue.enqueue(task("/a", 0));
        queue.enqueue(task("/b", 0));
        queue.enqueue(task("/a", 1));

        let drained = queue.drain_route("/a");
        assert_eq!(drained.len(), 2);
        assert_eq!(queue.pending(), 1);
        assert_eq!(queue.peek().unwrap().path, "/b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_waits_for_requeued_task_then_terminates() {
        let queue = Arc::new(TaskQueue::new(false));
        queue.enqueue(task("/a", 0));

        let first = queue.next().await.unwrap();
        queue.requeue(first, Duration::from_millis(500));

        let start = Instant::now();
        let second = queue.next().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
        queue.finish(&second.id);

        assert!(queue.next().await.is_none());
        assert!(queue.is_drained());
    }

    #[tokio::test]
    async fn test_next_wakes_when_in_flight_task_finishes() {
        let queue = Arc::new(TaskQueue::new(false));
        queue.enqueue(task("/a", 0));
        let running = queue.next().await.unwrap();

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.next().await })
        };
        tokio::task::yield_now().await;
        queue.finish(&running.id);

        assert!(waiter.await.unwrap().is_none());
    }
}
