//! Watcher identity.
//!
//! Every watcher (computed, user watch or render) gets a unique ID when it is
//! created. Deps key their subscriber lists by it and the scheduler uses it to
//! de-duplicate re-runs.

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(u64);

impl WatcherId {
    /// Generate a new unique watcher ID.
    ///
    /// Uses an atomic counter so IDs stay unique across controllers living on
    /// different threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for WatcherId {
    fn default() -> Self {
        Self::new()
    }
}

/// Anything a [`Dep`](super::Dep) can notify.
///
/// Deps hold subscribers weakly, so a dropped watcher simply stops receiving
/// notifications.
pub trait Reactive: Send + Sync {
    /// The watcher this subscriber belongs to.
    fn subscriber_id(&self) -> WatcherId;

    /// One of the subscriber's dependencies changed.
    fn update(&self);
}
