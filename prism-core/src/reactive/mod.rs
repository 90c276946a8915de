//! Reactive Primitives
//!
//! This module implements the dependency graph that sits under every
//! component controller: Deps, Watchers, the evaluation context that connects
//! them, and the observable data store.
//!
//! # Concepts
//!
//! ## Deps
//!
//! A Dep is attached to one reactive location (a field path in the store).
//! It remembers which watchers read the location and notifies them when the
//! location is written.
//!
//! ## Watchers
//!
//! A Watcher is a derived computation. Computed properties are lazy: a change
//! only marks them dirty. User watches and the render function are eager: a
//! change queues a re-run on the scheduler.
//!
//! ## The Store
//!
//! The store holds the component's data as a `serde_json` object and creates
//! Deps per field path on demand, so a nested write notifies exactly the
//! watchers that read the affected part of the tree.
//!
//! # Implementation Notes
//!
//! Dependency capture goes through a [`Tracker`] owned by the controller
//! instead of a global slot, so any number of controllers can evaluate side by
//! side, on one thread or many.

mod context;
mod dep;
mod store;
mod subscriber;
mod watcher;

pub use context::{CapturedDeps, ReactiveContext, Tracker};
pub use dep::{Dep, DepId};
pub use store::ReactiveStore;
pub use subscriber::{Reactive, WatcherId};
pub use watcher::{Callback, Getter, Watcher, WatcherKind, WatcherOptions};
