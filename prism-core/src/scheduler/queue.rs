//! Task Queue
//!
//! The reference [`Scheduler`]: a FIFO queue drained by explicit calls to
//! [`TaskQueue::flush`].
//!
//! # Algorithm
//!
//! 1. `queue` appends a task unless its key is already pending.
//! 2. `flush` pops tasks from the front until the queue is empty. A task's
//!    key stops being pending right before it runs, so a watcher whose run
//!    triggers itself again is queued for a second pass in the same flush.
//! 3. Tasks queued while flushing run in the same flush, after everything
//!    queued before them.
//! 4. A key that runs more than [`MAX_UPDATE_COUNT`] times in one flush is
//!    almost certainly an update loop; further runs are dropped and logged.

use std::collections::{HashMap, HashSet, VecDeque};

use parking_lot::Mutex;
use tracing::{debug, error};

use super::{Scheduler, Task, TaskKey};

/// Upper bound on runs of one keyed task within a single flush.
pub const MAX_UPDATE_COUNT: usize = 100;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Task>,
    /// Keys of tasks currently sitting in `pending`.
    has: HashSet<TaskKey>,
    flushing: bool,
}

/// FIFO de-duplicating task queue.
#[derive(Default)]
pub struct TaskQueue {
    state: Mutex<QueueState>,
}

impl TaskQueue {
    /// Create a new empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks waiting for a flush.
    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run queued tasks until the queue is empty.
    ///
    /// Returns the number of tasks that ran. A nested call from inside a
    /// running task returns 0 immediately; the outer flush picks up
    /// anything queued meanwhile.
    pub fn flush(&self) -> usize {
        {
            let mut state = self.state.lock();
            if state.flushing {
                return 0;
            }
            state.flushing = true;
        }
        let _reset = FlushGuard(self);

        let mut runs: HashMap<TaskKey, usize> = HashMap::new();
        let mut ran = 0;

        loop {
            // Pop under the lock, run outside it: tasks queue more tasks.
            let task = {
                let mut state = self.state.lock();
                let Some(task) = state.pending.pop_front() else {
                    break;
                };
                if let Some(key) = task.key() {
                    state.has.remove(&key);
                }
                task
            };

            if let Some(key) = task.key() {
                let count = runs.entry(key).or_default();
                *count += 1;
                if *count > MAX_UPDATE_COUNT {
                    error!(key, "possible infinite update loop, dropping task");
                    continue;
                }
            }

            task.run();
            ran += 1;
        }

        debug!(ran, "flushed task queue");
        ran
    }
}

struct FlushGuard<'a>(&'a TaskQueue);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.state.lock().flushing = false;
    }
}

impl Scheduler for TaskQueue {
    fn queue(&self, task: Task) {
        let mut state = self.state.lock();
        if let Some(key) = task.key() {
            if !state.has.insert(key) {
                return;
            }
        }
        state.pending.push_back(task);
    }
}

impl std::fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("TaskQueue")
            .field("pending", &state.pending.len())
            .field("flushing", &state.flushing)
            .finish()
    }
}
