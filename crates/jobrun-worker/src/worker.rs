//! The worker contract and the job-type lookup table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use jobrun_claude_sdk::PromptRunner;
use jobrun_core::{EngineConfig, JobConfig, JobType, WorkerResult};
use tokio_util::sync::CancellationToken;

use crate::{AiWorker, ExecWorker, SkillWorker};

/// Turns a job config into a result.
///
/// Implementations are stateless with respect to individual jobs and must
/// not panic or propagate errors: every failure is reported through
/// [`WorkerResult::failure`]. The token is the owning task's cancellation
/// signal.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Job type this worker handles.
    fn job_type(&self) -> JobType;

    async fn execute(&self, config: &JobConfig, cancel: CancellationToken) -> WorkerResult;
}

/// Workers keyed by the job type they handle.
#[derive(Clone, Default)]
pub struct WorkerSet {
    workers: HashMap<JobType, Arc<dyn Worker>>,
}

impl WorkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// All three built-in workers, sharing one prompt runner.
    pub fn with_defaults(config: &EngineConfig, runner: Arc<dyn PromptRunner>) -> Self {
        let mut set = Self::new();
        set.register(Arc::new(ExecWorker::new(config)));
        set.register(Arc::new(AiWorker::new(config, runner.clone())));
        set.register(Arc::new(SkillWorker::new(config, runner)));
        set
    }

    /// Register a worker under its job type, returning the one it replaces.
    pub fn register(&mut self, worker: Arc<dyn Worker>) -> Option<Arc<dyn Worker>> {
        self.workers.insert(worker.job_type(), worker)
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn Worker>> {
        self.workers.get(&job_type).cloned()
    }

    pub fn contains(&self, job_type: JobType) -> bool {
        self.workers.contains_key(&job_type)
    }
}

impl fmt::Debug for WorkerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<&str> = self.workers.keys().map(JobType::as_str).collect();
        types.sort_unstable();
        f.debug_struct("WorkerSet").field("job_types", &types).finish()
    }
}
