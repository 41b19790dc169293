//! Task queues for jobrun.
//!
//! A [`TaskQueue`] accepts arbitrary async operations, runs at most
//! `concurrency` of them at a time in priority order, and supports
//! cooperative cancellation through [`CancellationToken`]s. A
//! [`QueueRegistry`] hands out named queues so independent subsystems share
//! one concurrency domain.
//!
//! # Example
//!
//! ```rust,no_run
//! use jobrun_queue::{EnqueueOptions, QueueOptions, TaskError, TaskQueue};
//!
//! # async fn demo() {
//! let queue = TaskQueue::new("automation", QueueOptions::default());
//!
//! let handle = queue.enqueue(
//!     |cancel| async move {
//!         if cancel.is_cancelled() {
//!             return Err(TaskError::<()>::Cancelled);
//!         }
//!         Ok(2 + 2)
//!     },
//!     EnqueueOptions::default().with_priority(5),
//! );
//!
//! assert_eq!(handle.await.ok(), Some(4));
//! # }
//! ```

mod error;
mod queue;
mod registry;

pub use error::TaskError;
pub use queue::{EnqueueOptions, QueueOptions, QueueStats, TaskHandle, TaskQueue};
pub use registry::{QueueRegistry, AUTOMATION_QUEUE};
pub use tokio_util::sync::CancellationToken;
