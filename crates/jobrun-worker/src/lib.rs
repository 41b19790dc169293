//! jobrun workers
//!
//! Workers map a [`JobConfig`](jobrun_core::JobConfig) to a
//! [`WorkerResult`](jobrun_core::WorkerResult) by running an external process
//! or a prompt. They never fail with an error: spawn failures, timeouts and
//! cancellation all come back as data.
//!
//! The [`dispatcher`] module ties workers to a [`TaskQueue`](jobrun_queue::TaskQueue).

mod ai;
mod capture;
pub mod dispatcher;
mod exec;
mod process;
mod skill;
mod worker;

pub use ai::AiWorker;
pub use dispatcher::{
    submit, DispatchError, Dispatcher, JobHandle, OfflineSyncResult, PendingRun,
    PollingDispatcher, RunSource,
};
pub use exec::ExecWorker;
pub use skill::{build_skill_prompt, SkillWorker};
pub use worker::{Worker, WorkerSet};
