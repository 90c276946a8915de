//! Dependency Subjects
//!
//! A Dep is the notification hub for one reactive location. It owns no data;
//! it only remembers which watchers read the location during their latest
//! evaluation and tells them when the location changes.
//!
//! Subscribers are kept in insertion order and de-duplicated by watcher ID, so
//! notification order is the order in which watchers first subscribed.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::context::Tracker;
use super::subscriber::{Reactive, WatcherId};

/// Unique identifier for a Dep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepId(u64);

impl DepId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Change-notification fan-out point.
pub struct Dep {
    id: DepId,
    subscribers: Mutex<IndexMap<WatcherId, Weak<dyn Reactive>>>,
}

impl Dep {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            id: DepId::next(),
            subscribers: Mutex::new(IndexMap::new()),
        })
    }

    pub fn id(&self) -> DepId {
        self.id
    }

    /// Record this Dep as read by whatever `tracker` is evaluating.
    pub fn depend(self: &Arc<Self>, tracker: &Tracker) {
        tracker.track(self);
    }

    /// Subscribe a watcher. Subscribing twice keeps the original position.
    pub fn add_subscriber(&self, id: WatcherId, subscriber: Weak<dyn Reactive>) {
        self.subscribers.lock().entry(id).or_insert(subscriber);
    }

    pub fn remove_subscriber(&self, id: WatcherId) {
        self.subscribers.lock().shift_remove(&id);
    }

    pub fn has_subscriber(&self, id: WatcherId) -> bool {
        self.subscribers.lock().contains_key(&id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Tell every live subscriber that the location changed.
    ///
    /// Subscribers are collected first and notified after the lock is
    /// released: a notified watcher may re-subscribe or unsubscribe.
    pub fn notify(&self) {
        let live: Vec<Arc<dyn Reactive>> = {
            let mut subscribers = self.subscribers.lock();
            subscribers.retain(|_, weak| weak.strong_count() > 0);
            subscribers.values().filter_map(Weak::upgrade).collect()
        };

        for subscriber in live {
            subscriber.update();
        }
    }
}

impl fmt::Debug for Dep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dep")
            .field("id", &self.id)
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
