//! Priority-ordered, concurrency-limited task queue.
//!
//! Tasks start in descending priority order (FIFO among equal priorities)
//! and at most `concurrency` of them occupy the running set at once. All
//! state transitions happen under one mutex per queue that is never held
//! across an `.await`.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use jobrun_core::{TaskId, TaskStatus};
use serde::Serialize;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::TaskError;

/// Options fixed when a queue is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    /// Maximum number of tasks running at once. 0 is treated as 1.
    pub concurrency: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

impl QueueOptions {
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self { concurrency }
    }
}

/// Per-task options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// Higher runs first. Default 0.
    pub priority: i32,
    /// Label for logs.
    pub name: Option<String>,
}

impl EnqueueOptions {
    /// Builder method to set the priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Builder method to set the debug label.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Snapshot of a queue's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub failed: usize,
}

impl QueueStats {
    /// Tasks that have not settled yet.
    pub fn unsettled(&self) -> usize {
        self.pending + self.running
    }

    /// Tasks that reached a terminal state.
    pub fn settled(&self) -> usize {
        self.completed + self.cancelled + self.failed
    }
}

/// Handle to an enqueued task.
///
/// Awaiting it yields the task's result. Dropping it does not cancel the
/// task; use [`TaskQueue::cancel`] with [`TaskHandle::id`] for that.
pub struct TaskHandle<T, E> {
    id: TaskId,
    rx: oneshot::Receiver<Result<T, TaskError<E>>>,
}

impl<T, E> TaskHandle<T, E> {
    pub fn id(&self) -> &TaskId {
        &self.id
    }
}

impl<T, E> std::fmt::Debug for TaskHandle<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.id).finish_non_exhaustive()
    }
}

impl<T, E> Future for TaskHandle<T, E> {
    type Output = Result<T, TaskError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // A dropped sender means the task was discarded without running.
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(TaskError::Cancelled)))
    }
}

/// Decides the task outcome given whether a cancel was requested, delivers it
/// to the handle, and reports the terminal status.
type Settle = Box<dyn FnOnce(bool) -> TaskStatus + Send>;
type JobFuture = Pin<Box<dyn Future<Output = Settle> + Send>>;
/// Owns the handle's sender: dropping a job that never ran resolves its
/// handle as cancelled.
type Job = Box<dyn FnOnce(CancellationToken) -> JobFuture + Send>;

/// One unit of work owned by the queue.
struct Task {
    id: TaskId,
    name: Option<String>,
    priority: i32,
    status: TaskStatus,
    token: CancellationToken,
    created_at: DateTime<Utc>,
    /// Taken when the task starts.
    work: Option<Job>,
}

impl Task {
    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("-")
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Task>,
    running: HashMap<TaskId, Task>,
    completed: usize,
    cancelled: usize,
    failed: usize,
    next_seq: u64,
    pump_scheduled: bool,
}

struct QueueInner {
    name: String,
    concurrency: usize,
    state: Mutex<QueueState>,
}

/// A named work queue. Cheap to clone; clones share the same queue.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<QueueInner>,
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskQueue")
            .field("name", &self.inner.name)
            .field("concurrency", &self.inner.concurrency)
            .field("stats", &self.stats())
            .finish()
    }
}

impl TaskQueue {
    /// Create a new queue.
    pub fn new(name: impl Into<String>, options: QueueOptions) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.into(),
                concurrency: options.concurrency.max(1),
                state: Mutex::new(QueueState::default()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    /// Returns true if both handles refer to the same queue.
    pub fn same_queue(&self, other: &TaskQueue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Submit an operation.
    ///
    /// `execute` receives the task's cancellation token and is invoked only
    /// once the task reaches a free slot. Returns immediately; processing is
    /// scheduled on the current tokio runtime, so a burst of enqueues made
    /// without yielding is ordered by priority before any of them starts.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn enqueue<F, Fut, T, E>(&self, execute: F, options: EnqueueOptions) -> TaskHandle<T, E>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TaskError<E>>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let job: Job = Box::new(move |token| {
            Box::pin(async move {
                // Own task, so a panic is contained and reported.
                let outcome = match tokio::spawn(async move { execute(token).await }).await {
                    Ok(outcome) => outcome,
                    Err(join_error) if join_error.is_panic() => {
                        let message = panic_message(join_error.into_panic());
                        warn!(panic = %message, "Task panicked");
                        Err(TaskError::Panicked(message))
                    }
                    Err(_) => Err(TaskError::Cancelled),
                };

                let settle: Settle = Box::new(move |cancel_requested| {
                    let (status, delivered) = match outcome {
                        // Cancellation requested while running wins over a
                        // late success.
                        Ok(_) if cancel_requested => {
                            (TaskStatus::Cancelled, Err(TaskError::Cancelled))
                        }
                        Ok(value) => (TaskStatus::Completed, Ok(value)),
                        Err(TaskError::Cancelled) => {
                            (TaskStatus::Cancelled, Err(TaskError::Cancelled))
                        }
                        Err(error) => (TaskStatus::Failed, Err(error)),
                    };
                    // Receiver may have been dropped.
                    tx.send(delivered).ok();
                    status
                });
                settle
            })
        });

        let mut state = self.inner.lock_state();
        state.next_seq += 1;
        let now = Utc::now();
        let id = TaskId::sequential(state.next_seq, now.timestamp_millis());
        let task = Task {
            id: id.clone(),
            name: options.name,
            priority: options.priority,
            status: TaskStatus::Pending,
            token: CancellationToken::new(),
            created_at: now,
            work: Some(job),
        };

        debug!(
            queue = %self.inner.name,
            task_id = %id,
            name = task.label(),
            priority = task.priority,
            "Task enqueued"
        );

        // Before the first pending task with strictly lower priority.
        let position = state
            .pending
            .iter()
            .position(|pending| pending.priority < task.priority)
            .unwrap_or(state.pending.len());
        state.pending.insert(position, task);

        let schedule = !state.pump_scheduled;
        state.pump_scheduled = true;
        drop(state);

        if schedule {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.pump() });
        }

        TaskHandle { id, rx }
    }

    /// Cancel a task.
    ///
    /// A pending task is removed and its handle resolves to
    /// [`TaskError::Cancelled`] without the function ever running. A running
    /// task has its token cancelled and keeps its slot until the function
    /// returns. Returns false if the task is unknown or already settled.
    pub fn cancel(&self, id: &TaskId) -> bool {
        let mut state = self.inner.lock_state();

        if let Some(position) = state.pending.iter().position(|task| &task.id == id) {
            let Some(mut task) = state.pending.remove(position) else {
                return false;
            };
            task.status = TaskStatus::Cancelled;
            task.token.cancel();
            state.cancelled += 1;
            drop(state);

            info!(queue = %self.inner.name, task_id = %id, "Cancelled pending task");
            // Dropping the job resolves the handle.
            drop(task);
            return true;
        }

        if let Some(task) = state.running.get_mut(id) {
            task.status = TaskStatus::Cancelled;
            task.token.cancel();
            info!(
                queue = %self.inner.name,
                task_id = %id,
                "Cancellation requested for running task"
            );
            return true;
        }

        false
    }

    /// Cancel every pending task and signal every running one.
    pub fn cancel_all(&self) {
        let mut state = self.inner.lock_state();
        let drained: Vec<Task> = state.pending.drain(..).collect();
        state.cancelled += drained.len();

        for task in state.running.values_mut() {
            task.status = TaskStatus::Cancelled;
            task.token.cancel();
        }
        let running = state.running.len();
        drop(state);

        info!(
            queue = %self.inner.name,
            pending = drained.len(),
            running,
            "Cancelling all tasks"
        );

        for task in drained {
            task.token.cancel();
        }
    }

    /// Current counters.
    pub fn stats(&self) -> QueueStats {
        let state = self.inner.lock_state();
        QueueStats {
            pending: state.pending.len(),
            running: state.running.len(),
            completed: state.completed,
            cancelled: state.cancelled,
            failed: state.failed,
        }
    }

    /// Status of a task that has not settled yet.
    ///
    /// A running task that was asked to cancel reports `Cancelled` while it
    /// still occupies its slot.
    pub fn status(&self, id: &TaskId) -> Option<TaskStatus> {
        let state = self.inner.lock_state();
        state
            .running
            .get(id)
            .or_else(|| state.pending.iter().find(|task| &task.id == id))
            .map(|task| task.status)
    }

    /// Number of tasks that have not settled.
    pub fn len(&self) -> usize {
        self.stats().unsettled()
    }

    /// Returns true when nothing is pending or running.
    pub fn is_idle(&self) -> bool {
        self.len() == 0
    }
}

impl QueueInner {
    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        lock(&self.state)
    }

    /// Move pending heads into the running set until capacity is exhausted.
    fn pump(self: &Arc<Self>) {
        let mut state = self.lock_state();
        state.pump_scheduled = false;

        while state.running.len() < self.concurrency {
            let Some(mut task) = state.pending.pop_front() else {
                break;
            };
            let Some(job) = task.work.take() else {
                continue;
            };

            task.status = TaskStatus::Running;
            let id = task.id.clone();
            let token = task.token.clone();

            info!(
                queue = %self.name,
                task_id = %id,
                name = task.label(),
                priority = task.priority,
                waited_ms = (Utc::now() - task.created_at).num_milliseconds(),
                "Starting task"
            );

            state.running.insert(id.clone(), task);
            tokio::spawn(Arc::clone(self).drive(id, token, job));
        }
    }

    /// Run one task to completion and free its slot.
    async fn drive(self: Arc<Self>, id: TaskId, token: CancellationToken, job: Job) {
        if token.is_cancelled() {
            self.settle(&id, move |_| {
                drop(job);
                TaskStatus::Cancelled
            });
            return;
        }

        let settle = job(token).await;
        self.settle(&id, settle);
    }

    /// Remove a task from the running set, decide and deliver its outcome in
    /// one critical section, then refill capacity.
    fn settle<F>(self: &Arc<Self>, id: &TaskId, decide: F)
    where
        F: FnOnce(bool) -> TaskStatus,
    {
        let mut state = self.lock_state();
        let cancel_requested = state
            .running
            .remove(id)
            .map(|task| task.status == TaskStatus::Cancelled)
            .unwrap_or(false);

        let status = decide(cancel_requested);
        match status {
            TaskStatus::Completed => state.completed += 1,
            TaskStatus::Cancelled => state.cancelled += 1,
            TaskStatus::Failed => state.failed += 1,
            TaskStatus::Pending | TaskStatus::Running => {}
        }
        drop(state);

        info!(queue = %self.name, task_id = %id, status = %status, "Task settled");
        self.pump();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
