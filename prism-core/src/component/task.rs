//! Render completion tokens and the `updated` hook lock.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::scheduler::{Scheduler, Task};

type Waiter = Box<dyn FnOnce() + Send>;

struct RenderTaskInner {
    /// `None` once resolved.
    waiters: Mutex<Option<Vec<Waiter>>>,
    done: watch::Sender<bool>,
}

/// Single-shot token for "this patch has been painted".
///
/// Created when a render is dispatched and resolved exactly once, either by
/// the backend's completion callback or, before mount, by `mounted()`.
#[derive(Clone)]
pub struct RenderTask {
    inner: Arc<RenderTaskInner>,
}

impl RenderTask {
    pub fn new() -> Self {
        let (done, _) = watch::channel(false);
        Self {
            inner: Arc::new(RenderTaskInner {
                waiters: Mutex::new(Some(Vec::new())),
                done,
            }),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.waiters.lock().is_none()
    }

    /// Resolve the token and run everything waiting on it. Returns false if
    /// it was already resolved.
    pub fn resolve(&self) -> bool {
        let Some(waiters) = self.inner.waiters.lock().take() else {
            return false;
        };
        self.inner.done.send_replace(true);
        for waiter in waiters {
            waiter();
        }
        true
    }

    /// Run `f` once the token resolves, or right away if it already has.
    pub fn then<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut waiters = self.inner.waiters.lock();
            if let Some(list) = waiters.as_mut() {
                list.push(Box::new(f));
                return;
            }
        }
        f();
    }

    /// Wait asynchronously for resolution.
    pub async fn finished(&self) {
        let mut rx = self.inner.done.subscribe();
        // The sender lives as long as `self`, so this only returns once done.
        let _ = rx.wait_for(|done| *done).await;
    }

    pub fn ptr_eq(&self, other: &RenderTask) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Default for RenderTask {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RenderTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderTask")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// One-slot lock that collapses overlapping requests into a single queued
/// task. The slot frees up when the task starts running.
#[derive(Debug, Default)]
pub struct AsyncLock {
    locked: Arc<AtomicBool>,
}

impl AsyncLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `f` unless a previous request is still pending. Returns whether
    /// `f` was queued.
    pub fn run<F>(&self, scheduler: &dyn Scheduler, f: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self
            .locked
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let locked = self.locked.clone();
        scheduler.queue(Task::new(move || {
            locked.store(false, Ordering::Release);
            f();
        }));
        true
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}
