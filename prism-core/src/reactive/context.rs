//! Evaluation Context
//!
//! The tracker records which watcher is currently evaluating so that every
//! Dep read during the evaluation can be attributed to it.
//!
//! # Implementation
//!
//! Each controller owns one [`Tracker`] holding a stack of frames. Entering a
//! [`ReactiveContext`] pushes a frame for the evaluating watcher; Deps read
//! meanwhile are collected into the top frame; finishing the context pops the
//! frame and hands back the collected Deps. Nested evaluation (a computed read
//! from inside a render) pushes a second frame and restores the first one when
//! it finishes.
//!
//! Because the tracker is an object owned by a controller rather than a
//! process-wide slot, two controllers never see each other's evaluations.

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::dep::{Dep, DepId};
use super::WatcherId;

/// Deps captured during one evaluation, in first-read order.
pub type CapturedDeps = IndexMap<DepId, Arc<Dep>>;

#[derive(Debug)]
struct Frame {
    /// `None` for an untracked section.
    subscriber: Option<WatcherId>,
    deps: CapturedDeps,
}

/// Stack of evaluations in progress.
#[derive(Debug, Default)]
pub struct Tracker {
    stack: Mutex<Vec<Frame>>,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a watcher is evaluating and reads are being recorded.
    pub fn is_active(&self) -> bool {
        self.current_subscriber().is_some()
    }

    /// The watcher whose evaluation is on top of the stack.
    pub fn current_subscriber(&self) -> Option<WatcherId> {
        self.stack.lock().last().and_then(|frame| frame.subscriber)
    }

    /// Nesting depth, counting untracked sections.
    pub fn depth(&self) -> usize {
        self.stack.lock().len()
    }

    /// Record a read of `dep` in the current evaluation, if any.
    pub fn track(&self, dep: &Arc<Dep>) {
        let mut stack = self.stack.lock();
        if let Some(frame) = stack.last_mut() {
            if frame.subscriber.is_some() {
                frame.deps.entry(dep.id()).or_insert_with(|| Arc::clone(dep));
            }
        }
    }

    /// Run `f` with dependency recording switched off.
    ///
    /// Watcher callbacks and render dispatch run in here so their reads are
    /// not attributed to whichever watcher happens to be evaluating.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let _ctx = ReactiveContext::push(self, None);
        f()
    }

    fn pop(&self) -> Option<Frame> {
        self.stack.lock().pop()
    }
}

/// Guard for one evaluation. Pops its frame when finished or dropped, so the
/// stack stays balanced even if the evaluation panics.
pub struct ReactiveContext<'t> {
    tracker: &'t Tracker,
    subscriber: Option<WatcherId>,
    finished: bool,
}

impl<'t> ReactiveContext<'t> {
    /// Start recording reads for `subscriber`.
    pub fn enter(tracker: &'t Tracker, subscriber: WatcherId) -> Self {
        Self::push(tracker, Some(subscriber))
    }

    fn push(tracker: &'t Tracker, subscriber: Option<WatcherId>) -> Self {
        tracker.stack.lock().push(Frame {
            subscriber,
            deps: IndexMap::new(),
        });
        Self {
            tracker,
            subscriber,
            finished: false,
        }
    }

    /// Stop recording and return the Deps read since [`enter`](Self::enter).
    pub fn finish(mut self) -> CapturedDeps {
        self.finished = true;
        self.pop_checked().map(|frame| frame.deps).unwrap_or_default()
    }

    fn pop_checked(&self) -> Option<Frame> {
        let popped = self.tracker.pop();
        if let Some(frame) = &popped {
            debug_assert_eq!(
                frame.subscriber, self.subscriber,
                "ReactiveContext mismatch: expected {:?}, got {:?}",
                self.subscriber, frame.subscriber
            );
        }
        popped
    }
}

impl Drop for ReactiveContext<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.pop_checked();
        }
    }
}
