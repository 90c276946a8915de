//! Reactive Data Store
//!
//! The component's data fields, made observable at every depth.
//!
//! # Instrumentation
//!
//! Each field path has two Deps, created on first tracked read and dropped
//! once nothing holds them:
//!
//! - the *key* Dep fires when the value at that path is replaced, either
//!   directly or because an ancestor was replaced
//! - the *deep* Dep fires when anything at or below that path changes
//!
//! A shallow read of `a.b` subscribes to the key Deps of `a` and `a.b`. A deep
//! read (render, `deep` watches) additionally subscribes to the deep Dep of
//! `a.b`, since the reader consumed the whole subtree.
//!
//! Writing `a.b.c` notifies key(`a.b.c`) plus the deep Deps of `a.b.c`, `a.b`
//! and `a`. Readers of a sibling such as `a.x` are not disturbed.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use super::context::Tracker;
use super::dep::Dep;
use crate::error::PathError;
use crate::path::{get_in_map, slot_in_map, Path};

#[derive(Debug)]
struct FieldDeps {
    key: Arc<Dep>,
    deep: Arc<Dep>,
}

impl FieldDeps {
    fn new() -> Self {
        Self {
            key: Dep::new(),
            deep: Dep::new(),
        }
    }
}

/// Observable keyed data.
pub struct ReactiveStore {
    data: Mutex<Map<String, Value>>,
    deps: Mutex<HashMap<String, FieldDeps>>,
    tracker: Arc<Tracker>,
}

impl ReactiveStore {
    pub fn new(data: Map<String, Value>, tracker: Arc<Tracker>) -> Self {
        Self {
            data: Mutex::new(data),
            deps: Mutex::new(HashMap::new()),
            tracker,
        }
    }

    /// Read the value at `path`, recording a shallow dependency.
    pub fn get(&self, path: &Path) -> Option<Value> {
        self.track(path, false);
        self.peek(path)
    }

    /// Read the value at `path`, recording a dependency on its whole subtree.
    pub fn get_deep(&self, path: &Path) -> Option<Value> {
        self.track(path, true);
        self.peek(path)
    }

    /// Read without recording anything.
    pub fn peek(&self, path: &Path) -> Option<Value> {
        get_in_map(&self.data.lock(), path).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.data.lock().contains_key(key)
    }

    /// Top-level keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.data.lock().keys().cloned().collect()
    }

    /// An untracked copy of all data.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.data.lock().clone()
    }

    /// Write `value` at `path`, creating intermediate containers.
    ///
    /// Returns false (and notifies nobody) when the stored value is already
    /// equal to `value`. An array index more than one past the end is an
    /// error and leaves the data untouched.
    pub fn set(&self, path: &Path, value: Value) -> Result<bool, PathError> {
        {
            let mut data = self.data.lock();
            let Some(slot) = slot_in_map(&mut data, path)? else {
                return Ok(false);
            };
            if *slot == value {
                return Ok(false);
            }
            *slot = value;
        }
        self.notify(path);
        Ok(true)
    }

    fn track(&self, path: &Path, deep: bool) {
        if !self.tracker.is_active() {
            return;
        }

        let prefixes = path.prefixes();
        let last = prefixes.len().saturating_sub(1);
        let mut deps = self.deps.lock();
        for (i, prefix) in prefixes.into_iter().enumerate() {
            let field = deps.entry(prefix).or_insert_with(FieldDeps::new);
            field.key.depend(&self.tracker);
            if deep && i == last {
                field.deep.depend(&self.tracker);
            }
        }
    }

    fn notify(&self, path: &Path) {
        let to_notify: Vec<Arc<Dep>> = {
            let deps = self.deps.lock();
            let prefixes = path.prefixes();
            let mut out = Vec::new();
            if let Some(field) = prefixes.last().and_then(|full| deps.get(full)) {
                out.push(field.key.clone());
            }
            for prefix in prefixes.iter().rev() {
                if let Some(field) = deps.get(prefix) {
                    out.push(field.deep.clone());
                }
            }
            out
        };

        for dep in to_notify {
            dep.notify();
        }
        self.prune();
    }

    /// Drop field Deps nobody holds any more. A Dep referenced only by the
    /// map has no subscriber and is not captured by a running evaluation.
    fn prune(&self) {
        self.deps.lock().retain(|_, field| {
            Arc::strong_count(&field.key) > 1 || Arc::strong_count(&field.deep) > 1
        });
    }

    /// Total subscriptions across every field Dep.
    pub fn subscriber_count(&self) -> usize {
        self.prune();
        self.deps
            .lock()
            .values()
            .map(|field| field.key.subscriber_count() + field.deep.subscriber_count())
            .sum()
    }

    /// Number of field paths that currently carry Deps.
    pub fn tracked_paths(&self) -> usize {
        self.deps.lock().len()
    }
}

impl fmt::Debug for ReactiveStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveStore")
            .field("keys", &self.keys())
            .field("tracked_paths", &self.tracked_paths())
            .finish()
    }
}
