//! Watcher Implementation
//!
//! A Watcher is a unit of derived computation: a computed property, a user
//! watch, or a component's render function.
//!
//! # How Watchers Work
//!
//! 1. Evaluating a watcher runs its getter inside a [`ReactiveContext`]. Every
//!    Dep read during the run is captured.
//!
//! 2. After the run the watcher subscribes to exactly the captured Deps and
//!    unsubscribes from the ones it read last time but not this time.
//!
//! 3. When a Dep notifies:
//!    - lazy (computed) watchers only flip `dirty` and recompute on next read
//!    - sync watchers re-run on the spot
//!    - everything else queues a keyed re-run on the scheduler, so several
//!      notifications before a flush collapse into one run
//!
//! 4. A re-run compares the new value with the cached one and invokes the
//!    callback with `(new, old)` when they differ.
//!
//! # Computed Inside Render
//!
//! When a render reads a computed, the computed evaluates (if dirty) in a
//! nested context, then [`Watcher::depend`] copies the computed's Deps into
//! the render's context. A change to the computed's inputs therefore dirties
//! the computed and queues the render.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tracing::{trace, warn};

use super::context::{CapturedDeps, ReactiveContext, Tracker};
use super::subscriber::{Reactive, WatcherId};
use crate::scheduler::{Scheduler, Task};

/// Computation run by a watcher.
pub type Getter = Arc<dyn Fn() -> Value + Send + Sync>;

/// Invoked with `(new, old)` after a re-run produced a different value.
pub type Callback = Arc<dyn Fn(&Value, &Value) + Send + Sync>;

/// What a watcher is for. Only affects logging and teardown bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherKind {
    Computed,
    User,
    Render,
}

/// Scheduling behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatcherOptions {
    /// Do not evaluate until read; notifications only mark the watcher dirty.
    pub lazy: bool,
    /// Re-run immediately on notification instead of queueing.
    pub sync: bool,
}

impl WatcherOptions {
    pub fn lazy() -> Self {
        Self {
            lazy: true,
            ..Self::default()
        }
    }
}

struct WatcherState {
    value: Value,
    dirty: bool,
    active: bool,
    evaluating: bool,
    deps: CapturedDeps,
}

struct WatcherInner {
    id: WatcherId,
    kind: WatcherKind,
    options: WatcherOptions,
    getter: Getter,
    callback: Option<Callback>,
    tracker: Arc<Tracker>,
    scheduler: Arc<dyn Scheduler>,
    state: Mutex<WatcherState>,
    evaluations: AtomicUsize,
    weak_self: Weak<WatcherInner>,
}

/// Handle to a watcher. Clones share state.
#[derive(Clone)]
pub struct Watcher {
    inner: Arc<WatcherInner>,
}

impl Watcher {
    /// Create a watcher. Eager watchers evaluate once right away to collect
    /// their initial dependencies; lazy ones start dirty.
    pub fn new(
        kind: WatcherKind,
        getter: Getter,
        callback: Option<Callback>,
        options: WatcherOptions,
        tracker: Arc<Tracker>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Self {
        let inner = Arc::new_cyclic(|weak_self| WatcherInner {
            id: WatcherId::new(),
            kind,
            options,
            getter,
            callback,
            tracker,
            scheduler,
            state: Mutex::new(WatcherState {
                value: Value::Null,
                dirty: options.lazy,
                active: true,
                evaluating: false,
                deps: CapturedDeps::new(),
            }),
            evaluations: AtomicUsize::new(0),
            weak_self: weak_self.clone(),
        });
        let watcher = Self { inner };

        if !options.lazy {
            let value = watcher.get();
            watcher.inner.state.lock().value = value;
        }

        watcher
    }

    pub fn id(&self) -> WatcherId {
        self.inner.id
    }

    pub fn kind(&self) -> WatcherKind {
        self.inner.kind
    }

    /// The last evaluated value, without evaluating.
    pub fn value(&self) -> Value {
        self.inner.state.lock().value.clone()
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.state.lock().dirty
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    /// How many times the getter has run.
    pub fn evaluation_count(&self) -> usize {
        self.inner.evaluations.load(Ordering::SeqCst)
    }

    /// Number of Deps this watcher is currently subscribed to.
    pub fn subscription_count(&self) -> usize {
        self.inner.state.lock().deps.len()
    }

    /// Run the getter with dependency tracking and re-subscribe.
    ///
    /// A watcher that is re-entered while already evaluating (a computed
    /// that reads itself) returns its cached value instead of recursing.
    pub fn get(&self) -> Value {
        let inner = &self.inner;
        {
            let mut state = inner.state.lock();
            if state.evaluating {
                warn!(watcher = inner.id.raw(), "circular watcher evaluation, using cached value");
                return state.value.clone();
            }
            state.evaluating = true;
        }
        let _evaluating = EvaluatingGuard { inner };

        let ctx = ReactiveContext::enter(&inner.tracker, inner.id);
        let value = (inner.getter)();
        let captured = ctx.finish();
        inner.evaluations.fetch_add(1, Ordering::SeqCst);

        self.resubscribe(captured);
        trace!(watcher = inner.id.raw(), kind = ?inner.kind, "evaluated");
        value
    }

    /// Replace the subscription set with the Deps read in the latest run.
    fn resubscribe(&self, mut captured: CapturedDeps) {
        let inner = &self.inner;
        let mut state = inner.state.lock();

        if !state.active {
            // Torn down mid-evaluation: subscribe to nothing.
            captured.clear();
        }

        for (id, dep) in &state.deps {
            if !captured.contains_key(id) {
                dep.remove_subscriber(inner.id);
            }
        }

        let weak: Weak<dyn Reactive> = inner.weak_self.clone();
        for dep in captured.values() {
            dep.add_subscriber(inner.id, weak.clone());
        }

        state.deps = captured;
    }

    /// Recompute a lazy watcher and clear its dirty flag.
    pub fn evaluate(&self) {
        let value = self.get();
        let mut state = self.inner.state.lock();
        state.value = value;
        state.dirty = false;
    }

    /// Make whatever is evaluating right now depend on everything this
    /// watcher depends on.
    pub fn depend(&self) {
        let deps: Vec<_> = self.inner.state.lock().deps.values().cloned().collect();
        for dep in deps {
            dep.depend(&self.inner.tracker);
        }
    }

    /// Queue a re-run on the scheduler, whether or not anything changed.
    pub fn schedule(&self) {
        let weak = self.inner.weak_self.clone();
        self.inner.scheduler.queue(Task::keyed(self.inner.id.raw(), move || {
            if let Some(inner) = weak.upgrade() {
                Watcher { inner }.run();
            }
        }));
    }

    /// Re-run the getter and fire the callback if the value changed.
    pub fn run(&self) {
        if !self.is_active() {
            return;
        }

        let value = self.get();
        let old = {
            let mut state = self.inner.state.lock();
            std::mem::replace(&mut state.value, value.clone())
        };

        if value != old {
            if let Some(callback) = &self.inner.callback {
                self.inner.tracker.untracked(|| callback(&value, &old));
            }
        }
    }

    /// Unsubscribe from every Dep and stop reacting. Idempotent.
    pub fn teardown(&self) {
        let deps = {
            let mut state = self.inner.state.lock();
            state.active = false;
            std::mem::take(&mut state.deps)
        };
        for dep in deps.values() {
            dep.remove_subscriber(self.inner.id);
        }
    }
}

/// Clears the `evaluating` flag when [`Watcher::get`] returns or unwinds.
struct EvaluatingGuard<'w> {
    inner: &'w WatcherInner,
}

impl Drop for EvaluatingGuard<'_> {
    fn drop(&mut self) {
        self.inner.state.lock().evaluating = false;
    }
}

impl Reactive for WatcherInner {
    fn subscriber_id(&self) -> WatcherId {
        self.id
    }

    fn update(&self) {
        let Some(inner) = self.weak_self.upgrade() else {
            return;
        };
        let watcher = Watcher { inner };

        if self.options.lazy {
            self.state.lock().dirty = true;
        } else if self.options.sync {
            watcher.run();
        } else {
            watcher.schedule();
        }
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Watcher")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("dirty", &state.dirty)
            .field("active", &state.active)
            .field("dependency_count", &state.deps.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::Dep;
    use crate::scheduler::TaskQueue;
    use serde_json::json;

    struct Fixture {
        tracker: Arc<Tracker>,
        queue: Arc<TaskQueue>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                tracker: Arc::new(Tracker::new()),
                queue: Arc::new(TaskQueue::new()),
            }
        }

        fn watcher(
            &self,
            getter: impl Fn() -> Value + Send + Sync + 'static,
            callback: Option<Callback>,
            options: WatcherOptions,
        ) -> Watcher {
            Watcher::new(
                WatcherKind::User,
                Arc::new(getter),
                callback,
                options,
                self.tracker.clone(),
                self.queue.clone(),
            )
        }
    }

    /// A Dep paired with a value, standing in for a store field.
    fn cell(tracker: &Arc<Tracker>, value: i64) -> (Arc<Dep>, Arc<Mutex<i64>>, impl Fn() -> Value) {
        let dep = Dep::new();
        let value = Arc::new(Mutex::new(value));
        let read = {
            let dep = dep.clone();
            let value = value.clone();
            let tracker = tracker.clone();
            move || {
                dep.depend(&tracker);
                json!(*value.lock())
            }
        };
        (dep, value, read)
    }

    #[test]
    fn eager_watcher_evaluates_and_subscribes() {
        let fx = Fixture::new();
        let (dep, _, read) = cell(&fx.tracker, 3);

        let watcher = fx.watcher(read, None, WatcherOptions::default());

        assert_eq!(watcher.value(), json!(3));
        assert_eq!(watcher.evaluation_count(), 1);
        assert!(dep.has_subscriber(watcher.id()));
    }

    #[test]
    fn lazy_watcher_waits_for_first_read() {
        let fx = Fixture::new();
        let (dep, value, read) = cell(&fx.tracker, 1);

        let watcher = fx.watcher(read, None, WatcherOptions::lazy());
        assert!(watcher.is_dirty());
        assert_eq!(watcher.evaluation_count(), 0);

        watcher.evaluate();
        assert_eq!(watcher.value(), json!(1));
        assert!(!watcher.is_dirty());

        *value.lock() = 2;
        dep.notify();
        dep.notify();
        assert!(watcher.is_dirty());
        assert_eq!(watcher.evaluation_count(), 1);
        assert!(fx.queue.is_empty());

        watcher.evaluate();
        assert_eq!(watcher.value(), json!(2));
        assert_eq!(watcher.evaluation_count(), 2);
    }

    #[test]
    fn eager_watcher_queues_once_per_flush() {
        let fx = Fixture::new();
        let (dep, value, read) = cell(&fx.tracker, 0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = seen.clone();

        let callback: Callback = Arc::new(move |new, old| {
            seen_clone.lock().push((new.clone(), old.clone()));
        });
        let watcher = fx.watcher(read, Some(callback), WatcherOptions::default());

        *value.lock() = 5;
        dep.notify();
        dep.notify();
        assert_eq!(fx.queue.len(), 1);

        fx.queue.flush();
        assert_eq!(*seen.lock(), vec![(json!(5), json!(0))]);
        assert_eq!(watcher.evaluation_count(), 2);
    }

    #[test]
    fn callback_skipped_when_value_unchanged() {
        let fx = Fixture::new();
        let (dep, _, read) = cell(&fx.tracker, 7);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let callback: Callback = Arc::new(move |_, _| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });
        let options = WatcherOptions {
            sync: true,
            ..WatcherOptions::default()
        };
        let watcher = fx.watcher(read, Some(callback), options);

        dep.notify();
        assert_eq!(watcher.evaluation_count(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn stale_dependencies_are_dropped() {
        let fx = Fixture::new();
        let (flag_dep, flag, read_flag) = cell(&fx.tracker, 1);
        let (a_dep, _, read_a) = cell(&fx.tracker, 10);
        let (b_dep, _, read_b) = cell(&fx.tracker, 20);

        let watcher = fx.watcher(
            move || {
                if read_flag() == json!(1) {
                    read_a()
                } else {
                    read_b()
                }
            },
            None,
            WatcherOptions::default(),
        );
        assert!(a_dep.has_subscriber(watcher.id()));
        assert!(!b_dep.has_subscriber(watcher.id()));

        *flag.lock() = 0;
        flag_dep.notify();
        fx.queue.flush();

        assert_eq!(watcher.value(), json!(20));
        assert!(!a_dep.has_subscriber(watcher.id()));
        assert!(b_dep.has_subscriber(watcher.id()));
        assert_eq!(watcher.subscription_count(), 2);
    }

    #[test]
    fn depend_forwards_computed_deps_to_outer_watcher() {
        let fx = Fixture::new();
        let (dep, value, read) = cell(&fx.tracker, 2);

        let computed = fx.watcher(read, None, WatcherOptions::lazy());
        let computed_clone = computed.clone();
        let outer = fx.watcher(
            move || {
                if computed_clone.is_dirty() {
                    computed_clone.evaluate();
                }
                computed_clone.depend();
                computed_clone.value()
            },
            None,
            WatcherOptions::default(),
        );

        assert_eq!(outer.value(), json!(2));
        assert!(dep.has_subscriber(computed.id()));
        assert!(dep.has_subscriber(outer.id()));

        *value.lock() = 4;
        dep.notify();
        assert!(computed.is_dirty());
        fx.queue.flush();

        assert_eq!(outer.value(), json!(4));
        assert_eq!(computed.evaluation_count(), 2);
    }

    #[test]
    fn teardown_unsubscribes_everything() {
        let fx = Fixture::new();
        let (dep, _, read) = cell(&fx.tracker, 1);

        let watcher = fx.watcher(read, None, WatcherOptions::default());
        watcher.teardown();

        assert!(!watcher.is_active());
        assert_eq!(dep.subscriber_count(), 0);
        assert_eq!(watcher.subscription_count(), 0);

        watcher.schedule();
        fx.queue.flush();
        assert_eq!(watcher.evaluation_count(), 1);
    }

    #[test]
    fn panicking_getter_does_not_wedge_the_watcher() {
        use std::panic::{catch_unwind, AssertUnwindSafe};
        use std::sync::atomic::AtomicBool;

        let fx = Fixture::new();
        let (dep, value, read) = cell(&fx.tracker, 1);
        let fail = Arc::new(AtomicBool::new(true));
        let failing = fail.clone();
        let watcher = fx.watcher(
            move || {
                if failing.swap(false, Ordering::SeqCst) {
                    panic!("getter failed");
                }
                read()
            },
            None,
            WatcherOptions::lazy(),
        );

        assert!(catch_unwind(AssertUnwindSafe(|| watcher.get())).is_err());
        assert_eq!(watcher.evaluation_count(), 0);
        assert_eq!(fx.tracker.depth(), 0);

        *value.lock() = 5;
        assert_eq!(watcher.get(), json!(5));
        assert_eq!(watcher.evaluation_count(), 1);
        assert!(dep.has_subscriber(watcher.id()));
    }
}
