//! Update Scheduling
//!
//! Controllers never run deferred work themselves. Watcher re-runs, next-tick
//! callbacks and the `updated` hook are all handed to a [`Scheduler`] as
//! [`Task`]s, and the host decides when to drain them (a microtask, the end of
//! an event loop turn, an explicit flush in tests).
//!
//! # Contract
//!
//! A scheduler must:
//!
//! 1. Run every queued task exactly once, eventually.
//! 2. Run tasks in the order they were queued.
//! 3. Drop a keyed task if a task with the same key is still pending, so a
//!    watcher notified several times before a flush runs once.
//!
//! [`TaskQueue`] is the reference implementation.

mod queue;

pub use queue::{TaskQueue, MAX_UPDATE_COUNT};

/// Identity used to de-duplicate pending tasks.
pub type TaskKey = u64;

/// A unit of deferred work.
pub struct Task {
    key: Option<TaskKey>,
    run: Box<dyn FnOnce() + Send>,
}

impl Task {
    /// A task that is never de-duplicated.
    pub fn new<F>(run: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            key: None,
            run: Box::new(run),
        }
    }

    /// A task de-duplicated against other pending tasks with the same key.
    pub fn keyed<F>(key: TaskKey, run: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            key: Some(key),
            run: Box::new(run),
        }
    }

    pub fn key(&self) -> Option<TaskKey> {
        self.key
    }

    /// Consume and run the task.
    pub fn run(self) {
        (self.run)();
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task").field("key", &self.key).finish()
    }
}

/// FIFO, de-duplicating sink for deferred work.
pub trait Scheduler: Send + Sync {
    /// Queue a task for a later flush.
    fn queue(&self, task: Task);
}
