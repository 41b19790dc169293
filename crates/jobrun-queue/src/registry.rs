//! Registry of named queues.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::{QueueOptions, TaskQueue};

/// Name of the shared queue job runs are dispatched through.
pub const AUTOMATION_QUEUE: &str = "automation";

/// Maps queue names to lazily created queues.
///
/// Pass one registry (usually behind an `Arc`) to every subsystem that should
/// share concurrency domains. The first caller for a name decides the queue's
/// options; later callers get the existing queue and their options are
/// ignored.
#[derive(Debug, Default)]
pub struct QueueRegistry {
    queues: Mutex<HashMap<String, TaskQueue>>,
}

impl QueueRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the queue for `name`, creating it with `options` if needed.
    pub fn queue(&self, name: &str, options: QueueOptions) -> TaskQueue {
        let mut queues = self.lock();
        if let Some(queue) = queues.get(name) {
            if queue.concurrency() != options.concurrency.max(1) {
                debug!(
                    queue = name,
                    existing = queue.concurrency(),
                    requested = options.concurrency,
                    "Queue already exists, ignoring requested options"
                );
            }
            return queue.clone();
        }

        info!(queue = name, concurrency = options.concurrency, "Creating queue");
        let queue = TaskQueue::new(name, options);
        queues.insert(name.to_string(), queue.clone());
        queue
    }

    /// Get an existing queue.
    pub fn get(&self, name: &str) -> Option<TaskQueue> {
        self.lock().get(name).cloned()
    }

    /// Names of all created queues, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Cancel everything in every queue.
    pub fn cancel_all(&self) {
        let queues: Vec<TaskQueue> = self.lock().values().cloned().collect();
        for queue in queues {
            queue.cancel_all();
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, TaskQueue>> {
        self.queues.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EnqueueOptions, TaskError};
    use tokio::sync::oneshot;

    #[test]
    fn test_same_name_same_queue() {
        let registry = QueueRegistry::new();
        let a = registry.queue("github", QueueOptions::with_concurrency(2));
        let b = registry.queue("github", QueueOptions::default());

        assert!(a.same_queue(&b));
        assert_eq!(b.concurrency(), 2);
        assert!(registry.get("github").is_some());
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_names_sorted() {
        let registry = QueueRegistry::new();
        registry.queue(AUTOMATION_QUEUE, QueueOptions::default());
        registry.queue("github", QueueOptions::default());
        assert_eq!(registry.names(), vec!["automation", "github"]);
    }

    #[tokio::test]
    async fn test_queues_are_independent() {
        let registry = QueueRegistry::new();
        let slow = registry.queue("slow", QueueOptions::default());
        let fast = registry.queue("fast", QueueOptions::default());

        let (release, rx) = oneshot::channel::<()>();
        let blocked = slow.enqueue(
            move |_| async move {
                rx.await.ok();
                Ok::<_, TaskError<()>>("slow")
            },
            EnqueueOptions::default(),
        );

        let quick = fast.enqueue(|_| async { Ok::<_, TaskError<()>>("fast") }, EnqueueOptions::default());
        assert_eq!(quick.await, Ok("fast"));
        assert_eq!(slow.stats().running + slow.stats().pending, 1);

        release.send(()).unwrap();
        assert_eq!(blocked.await, Ok("slow"));
    }

    #[tokio::test]
    async fn test_cancel_all_across_queues() {
        let registry = QueueRegistry::new();
        let a = registry.queue("a", QueueOptions::default());
        let b = registry.queue("b", QueueOptions::default());

        let ha = a.enqueue(|_| async { Ok::<_, TaskError<()>>(()) }, EnqueueOptions::default());
        let hb = b.enqueue(|_| async { Ok::<_, TaskError<()>>(()) }, EnqueueOptions::default());
        registry.cancel_all();

        assert_eq!(ha.await, Err(TaskError::Cancelled));
        assert_eq!(hb.await, Err(TaskError::Cancelled));
    }
}
