//! Prism Core
//!
//! This crate provides the reactive controller that sits between a compiled
//! UI component and the backend that paints it. It implements:
//!
//! - Reactive primitives (Deps, Watchers, an observable data store)
//! - Computed properties and user watches
//! - A render-diff engine that sends the backend only what changed
//! - Lifecycle management and update batching
//!
//! Backends differ (a mini-program runtime, a native shell, a test harness),
//! so everything backend-specific comes in through [`HostBindings`] and a
//! [`Scheduler`].
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `path`: Field path parsing and tree access
//! - `reactive`: Dependency tracking, watchers and the data store
//! - `scheduler`: Deferred work queue
//! - `diff`: Value comparison and the render snapshot
//! - `component`: The controller, its lifecycle and render pipeline
//! - `config`: Runtime switches shared by controllers
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prism_core::{ComponentOptions, Controller, HostBindings, RuntimeConfig, TaskQueue};
//! use serde_json::json;
//!
//! let queue = Arc::new(TaskQueue::new());
//! let host = HostBindings::new()
//!     .with_initial_data(serde_json::Map::new)
//!     .with_render(|patch, done| {
//!         println!("patch: {patch:?}");
//!         if let Some(done) = done {
//!             done.complete();
//!         }
//!     });
//!
//! let options = ComponentOptions::new("counter").data(json!({ "count": 0 }));
//! let counter = Controller::new(options, host, queue.clone(), RuntimeConfig::default());
//!
//! counter.created()?;   // prints the first patch
//! counter.mounted();
//!
//! counter.set("count", json!(1))?;
//! queue.flush();        // prints: patch: {"count": 1}
//! ```

pub mod component;
pub mod config;
pub mod diff;
pub mod error;
pub mod path;
pub mod reactive;
pub mod scheduler;

pub use component::{
    ComponentOptions, Completion, ComputedDef, Controller, HookKind, HostBindings,
    LifecycleState, RenderTask, Unwatch, WatchHandler, WatchOptions, WatchSource, CID_KEY,
};
pub use config::RuntimeConfig;
pub use diff::{Patch, RenderSnapshot};
pub use error::{ConfigError, ControllerError, PathError, RenderError};
pub use scheduler::{Scheduler, Task, TaskQueue};
