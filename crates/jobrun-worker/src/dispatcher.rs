//! Dispatching job runs onto queues.
//!
//! The engine never decides which runs exist. A [`RunSource`] supplies them
//! and stores their outcomes; a [`Dispatcher`] moves runs from the source
//! onto a [`TaskQueue`] through the matching [`Worker`].
//!
//! [`Worker`]: crate::Worker

use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use jobrun_core::{JobConfig, JobType, RunId, WorkerResult};
use jobrun_queue::{EnqueueOptions, TaskError, TaskHandle, TaskQueue};
use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::WorkerSet;

/// Handle to a submitted job. Workers never fail, so the only errors are
/// cancellation and panics.
pub type JobHandle = TaskHandle<WorkerResult, Infallible>;

/// Errors raised while dispatching.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No worker registered for job type '{0}'")]
    NoWorker(JobType),

    /// The run source failed.
    #[error("Run source error: {0}")]
    Source(String),
}

/// Summary of an offline catch-up pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineSyncResult {
    pub runs_created: usize,
}

/// A run waiting to be executed.
#[derive(Debug, Clone)]
pub struct PendingRun {
    pub run_id: RunId,
    pub job_type: JobType,
    pub config: JobConfig,
    pub priority: i32,
}

/// Where runs come from and where their outcomes go.
#[async_trait]
pub trait RunSource: Send + Sync + 'static {
    /// Runs that are due now. May include runs already handed out.
    async fn pending_runs(&self) -> Result<Vec<PendingRun>, DispatchError>;

    /// Store the outcome of a finished run.
    async fn record_result(&self, run_id: &RunId, result: &WorkerResult)
        -> Result<(), DispatchError>;

    /// Create runs for schedules missed while the app was not running.
    /// Returns how many runs were created.
    async fn catch_up_missed(&self) -> Result<usize, DispatchError>;
}

/// Lifecycle of a dispatcher. `start` and `stop` are idempotent.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    fn start(&self);

    fn stop(&self);

    async fn run_offline_sync(&self) -> Result<OfflineSyncResult, DispatchError>;
}

/// Resolve the worker for `job_type` and enqueue it on `queue`.
pub fn submit(
    queue: &TaskQueue,
    workers: &WorkerSet,
    job_type: JobType,
    config: JobConfig,
    priority: i32,
) -> Result<JobHandle, DispatchError> {
    let worker = workers
        .get(job_type)
        .ok_or(DispatchError::NoWorker(job_type))?;

    let options = EnqueueOptions::default()
        .with_priority(priority)
        .with_name(job_type.as_str());

    Ok(queue.enqueue(
        move |cancel: CancellationToken| async move {
            Ok::<_, TaskError<Infallible>>(worker.execute(&config, cancel).await)
        },
        options,
    ))
}

/// Polls a [`RunSource`] and feeds due runs to a queue.
///
/// A run is tracked from submission until its result is recorded and is
/// never submitted twice in that window, even if the source keeps
/// returning it. Runs whose task was cancelled are not recorded and are
/// never submitted again by this dispatcher.
pub struct PollingDispatcher<S: RunSource> {
    inner: Arc<PollingInner<S>>,
}

struct PollingInner<S> {
    source: Arc<S>,
    queue: TaskQueue,
    workers: WorkerSet,
    poll_interval: Duration,
    in_flight: Mutex<HashSet<RunId>>,
    cancelled: Mutex<HashSet<RunId>>,
    shutdown: Mutex<Option<CancellationToken>>,
}

/// Lower bound for the poll interval; `tokio::time::interval` rejects zero.
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

impl<S: RunSource> PollingDispatcher<S> {
    /// Create a dispatcher. A zero `poll_interval` is raised to 1ms.
    pub fn new(source: Arc<S>, queue: TaskQueue, workers: WorkerSet, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(PollingInner {
                source,
                queue,
                workers,
                poll_interval: poll_interval.max(MIN_POLL_INTERVAL),
                in_flight: Mutex::new(HashSet::new()),
                cancelled: Mutex::new(HashSet::new()),
                shutdown: Mutex::new(None),
            }),
        }
    }

    /// Submit every due run that is not already in flight. Returns how many
    /// were submitted.
    pub async fn poll_once(&self) -> Result<usize, DispatchError> {
        self.inner.poll_once().await
    }

    /// Number of runs submitted but not yet recorded.
    pub fn in_flight(&self) -> usize {
        lock(&self.inner.in_flight).len()
    }

    /// Number of runs that were cancelled and will not be resubmitted.
    pub fn cancelled(&self) -> usize {
        lock(&self.inner.cancelled).len()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.shutdown).is_some()
    }
}

impl<S: RunSource> PollingInner<S> {
    async fn poll_once(self: &Arc<Self>) -> Result<usize, DispatchError> {
        let runs = self.source.pending_runs().await?;
        let mut submitted = 0;

        for PendingRun {
            run_id,
            job_type,
            config,
            priority,
        } in runs
        {
            if lock(&self.cancelled).contains(&run_id) {
                debug!(run_id = %run_id, "Run was cancelled, skipping");
                continue;
            }
            if !lock(&self.in_flight).insert(run_id.clone()) {
                debug!(run_id = %run_id, "Run already in flight, skipping");
                continue;
            }

            match submit(&self.queue, &self.workers, job_type, config, priority) {
                Ok(handle) => {
                    info!(
                        run_id = %run_id,
                        task_id = %handle.id(),
                        job_type = %job_type,
                        queue = self.queue.name(),
                        "Dispatched run"
                    );
                    submitted += 1;
                    let inner = self.clone();
                    tokio::spawn(async move {
                        inner.complete(run_id, handle).await;
                    });
                }
                Err(e) => {
                    warn!(run_id = %run_id, error = %e, "Could not dispatch run");
                    let result = WorkerResult::failure(e.to_string(), Duration::ZERO);
                    self.record(&run_id, &result).await;
                    lock(&self.in_flight).remove(&run_id);
                }
            }
        }

        Ok(submitted)
    }

    async fn complete(&self, run_id: RunId, handle: JobHandle) {
        match handle.await {
            Ok(result) => self.record(&run_id, &result).await,
            Err(e) if e.is_cancelled() => {
                info!(run_id = %run_id, "Run cancelled, not recording");
                lock(&self.cancelled).insert(run_id.clone());
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Run did not produce a result");
                let result = WorkerResult::failure(e.to_string(), Duration::ZERO);
                self.record(&run_id, &result).await;
            }
        }
        lock(&self.in_flight).remove(&run_id);
    }

    async fn record(&self, run_id: &RunId, result: &WorkerResult) {
        if let Err(e) = self.source.record_result(run_id, result).await {
            error!(run_id = %run_id, error = %e, "Failed to record run result");
        }
    }
}

#[async_trait]
impl<S: RunSource> Dispatcher for PollingDispatcher<S> {
    fn start(&self) {
        let mut shutdown = lock(&self.inner.shutdown);
        if shutdown.is_some() {
            return;
        }

        let token = CancellationToken::new();
        *shutdown = Some(token.clone());

        let inner = self.inner.clone();
        info!(
            queue = inner.queue.name(),
            poll_interval_ms = inner.poll_interval.as_millis() as u64,
            "Starting dispatcher"
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.poll_interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = inner.poll_once().await {
                            warn!(error = %e, "Poll failed");
                        }
                    }
                }
            }
            info!(queue = inner.queue.name(), "Dispatcher stopped");
        });
    }

    fn stop(&self) {
        if let Some(token) = lock(&self.inner.shutdown).take() {
            token.cancel();
        }
    }

    async fn run_offline_sync(&self) -> Result<OfflineSyncResult, DispatchError> {
        let runs_created = self.inner.source.catch_up_missed().await?;
        info!(runs_created, "Offline sync complete");
        if runs_created > 0 {
            self.inner.poll_once().await?;
        }
        Ok(OfflineSyncResult { runs_created })
    }
}

impl<S: RunSource> Drop for PollingDispatcher<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Worker;

    use jobrun_queue::QueueOptions;

    /// Sleeps, then echoes the command back.
    struct SlowEcho(Duration);

    #[async_trait]
    impl Worker for SlowEcho {
        fn job_type(&self) -> JobType {
            JobType::Exec
        }

        async fn execute(&self, config: &JobConfig, cancel: CancellationToken) -> WorkerResult {
            tokio::select! {
                _ = tokio::time::sleep(self.0) => {
                    WorkerResult::success(config.command.clone(), self.0)
                }
                _ = cancel.cancelled() => WorkerResult::failure("cancelled", Duration::ZERO),
            }
        }
    }

    #[derive(Default)]
    struct FakeSource {
        pending: Mutex<Vec<PendingRun>>,
        recorded: Mutex<Vec<(RunId, WorkerResult)>>,
        missed: Mutex<Vec<PendingRun>>,
    }

    impl FakeSource {
        fn add(&self, id: &str, job_type: JobType, command: &str) {
            self.pending.lock().unwrap().push(run(id, job_type, command));
        }

        fn recorded(&self) -> Vec<(RunId, WorkerResult)> {
            self.recorded.lock().unwrap().clone()
        }

        async fn wait_for_records(&self, count: usize) {
            tokio::time::timeout(Duration::from_secs(5), async {
                while self.recorded.lock().unwrap().len() < count {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await
            .unwrap();
        }
    }

    fn run(id: &str, job_type: JobType, command: &str) -> PendingRun {
        PendingRun {
            run_id: RunId::new(id),
            job_type,
            config: JobConfig::exec(command),
            priority: 0,
        }
    }

    #[async_trait]
    impl RunSource for FakeSource {
        async fn pending_runs(&self) -> Result<Vec<PendingRun>, DispatchError> {
            Ok(self.pending.lock().unwrap().clone())
        }

        async fn record_result(
            &self,
            run_id: &RunId,
            result: &WorkerResult,
        ) -> Result<(), DispatchError> {
            self.pending.lock().unwrap().retain(|r| &r.run_id != run_id);
            self.recorded
                .lock()
                .unwrap()
                .push((run_id.clone(), result.clone()));
            Ok(())
        }

        async fn catch_up_missed(&self) -> Result<usize, DispatchError> {
            let missed: Vec<PendingRun> = self.missed.lock().unwrap().drain(..).collect();
            let count = missed.len();
            self.pending.lock().unwrap().extend(missed);
            Ok(count)
        }
    }

    fn dispatcher(source: Arc<FakeSource>, delay: Duration) -> PollingDispatcher<FakeSource> {
        let mut workers = WorkerSet::new();
        workers.register(Arc::new(SlowEcho(delay)));
        let queue = TaskQueue::new("automation", QueueOptions::default());
        PollingDispatcher::new(source, queue, workers, Duration::from_millis(20))
    }

    #[tokio::test]
    async fn test_submit_runs_worker_on_queue() {
        let mut workers = WorkerSet::new();
        workers.register(Arc::new(SlowEcho(Duration::from_millis(1))));
        let queue = TaskQueue::new("automation", QueueOptions::default());

        let handle = submit(&queue, &workers, JobType::Exec, JobConfig::exec("hi"), 3).unwrap();
        let result = handle.await.unwrap();
        assert_eq!(result.output(), Some("hi"));
        assert_eq!(queue.stats().completed, 1);
    }

    #[test]
    fn test_submit_without_worker() {
        let queue = TaskQueue::new("automation", QueueOptions::default());
        let err = submit(&queue, &WorkerSet::new(), JobType::Ai, JobConfig::ai("hi"), 0).unwrap_err();
        assert!(matches!(err, DispatchError::NoWorker(JobType::Ai)));
        assert_eq!(queue.len(), 0);
    }

    #[tokio::test]
    async fn test_run_is_never_submitted_twice() {
        let source = Arc::new(FakeSource::default());
        source.add("run-1", JobType::Exec, "one");
        let dispatcher = dispatcher(source.clone(), Duration::from_millis(100));

        assert_eq!(dispatcher.poll_once().await.unwrap(), 1);
        assert_eq!(dispatcher.poll_once().await.unwrap(), 0);
        assert_eq!(dispatcher.in_flight(), 1);

        source.wait_for_records(1).await;
        let recorded = source.recorded();
        assert_eq!(recorded[0].0, RunId::new("run-1"));
        assert_eq!(recorded[0].1.output(), Some("one"));

        // Recorded runs leave the source, so nothing is left to submit.
        assert_eq!(dispatcher.poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_worker_is_recorded_as_failure() {
        let source = Arc::new(FakeSource::default());
        source.add("run-ai", JobType::Ai, "unused");
        let dispatcher = dispatcher(source.clone(), Duration::from_millis(1));

        assert_eq!(dispatcher.poll_once().await.unwrap(), 0);
        let recorded = source.recorded();
        assert_eq!(
            recorded[0].1.error(),
            Some("No worker registered for job type 'ai'")
        );
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_runs_are_not_recorded() {
        let source = Arc::new(FakeSource::default());
        source.add("run-1", JobType::Exec, "one");
        let dispatcher = dispatcher(source.clone(), Duration::from_secs(60));

        assert_eq!(dispatcher.poll_once().await.unwrap(), 1);
        dispatcher.inner.queue.cancel_all();

        tokio::time::timeout(Duration::from_secs(5), async {
            while dispatcher.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert!(source.recorded().is_empty());
        assert_eq!(dispatcher.cancelled(), 1);

        // The source still lists the run; it must not come back.
        assert_eq!(dispatcher.poll_once().await.unwrap(), 0);
        assert_eq!(dispatcher.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_zero_poll_interval_is_clamped() {
        let source = Arc::new(FakeSource::default());
        source.add("run-1", JobType::Exec, "one");
        let mut workers = WorkerSet::new();
        workers.register(Arc::new(SlowEcho(Duration::from_millis(1))));
        let queue = TaskQueue::new("automation", QueueOptions::default());
        let dispatcher = PollingDispatcher::new(source.clone(), queue, workers, Duration::ZERO);

        assert_eq!(dispatcher.inner.poll_interval, MIN_POLL_INTERVAL);
        dispatcher.start();
        source.wait_for_records(1).await;
        dispatcher.stop();
    }

    #[tokio::test]
    async fn test_start_polls_until_stopped() {
        let source = Arc::new(FakeSource::default());
        source.add("run-1", JobType::Exec, "one");
        let dispatcher = dispatcher(source.clone(), Duration::from_millis(1));

        dispatcher.start();
        dispatcher.start();
        assert!(dispatcher.is_running());
        source.wait_for_records(1).await;

        dispatcher.stop();
        dispatcher.stop();
        assert!(!dispatcher.is_running());
        assert_eq!(source.recorded().len(), 1);
    }

    #[tokio::test]
    async fn test_offline_sync_dispatches_missed_runs() {
        let source = Arc::new(FakeSource::default());
        source
            .missed
            .lock()
            .unwrap()
            .extend([run("missed-1", JobType::Exec, "a"), run("missed-2", JobType::Exec, "b")]);
        let dispatcher = dispatcher(source.clone(), Duration::from_millis(1));

        let sync = dispatcher.run_offline_sync().await.unwrap();
        assert_eq!(sync, OfflineSyncResult { runs_created: 2 });

        source.wait_for_records(2).await;
        let mut ids: Vec<String> = source
            .recorded()
            .into_iter()
            .map(|(id, _)| id.into_inner())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["missed-1", "missed-2"]);
    }
}
