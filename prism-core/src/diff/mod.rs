//! Render-Diff Engine
//!
//! Backends are slow to receive data, so a controller never sends more than
//! what changed since the last patch. This module holds the comparison
//! primitive and the snapshot that remembers what the backend has seen.
//!
//! # Comparison
//!
//! [`diff_and_clone`] compares a current value against the value the backend
//! last received. Equal values short-circuit without cloning anything. For
//! values that differ it returns an owned clone plus, when the change is
//! confined to nested members, the list of changed sub-paths:
//!
//! ```text
//! previous  {"x": 1, "y": [1, 2]}
//! current   {"x": 2, "y": [1, 2, 3]}
//! changes   {".x": 2, ".y[2]": 3}
//! ```
//!
//! A removed object key or a shorter array cannot be expressed as a set of
//! writes, so it turns the enclosing value into a whole-value change.

mod snapshot;

pub use snapshot::RenderSnapshot;

use indexmap::{IndexMap, IndexSet};
use serde_json::Value;

use crate::path::first_key;

/// A keyed value bag addressed by field paths.
pub type Patch = IndexMap<String, Value>;

/// Result of comparing a value that changed.
#[derive(Debug, Clone, PartialEq)]
pub struct DiffOutcome {
    /// Owned copy of the current value.
    pub clone: Value,
    /// Relative sub-paths (`.x`, `[2]`) that changed, or `None` when the
    /// value changed as a whole.
    pub changes: Option<Patch>,
}

impl DiffOutcome {
    fn whole(value: &Value) -> Self {
        Self {
            clone: value.clone(),
            changes: None,
        }
    }

    /// Write the outcome into `patch` under `key`: one entry per changed
    /// sub-path, or the whole value.
    pub fn emit_into(&self, patch: &mut Patch, key: &str) {
        match &self.changes {
            Some(changes) => {
                for (sub_path, value) in changes {
                    patch.insert(format!("{key}{sub_path}"), value.clone());
                }
            }
            None => {
                patch.insert(key.to_string(), self.clone.clone());
            }
        }
    }
}

/// Compare `current` with `previous`.
///
/// Returns `None` when they are equal. A missing `previous` is always a
/// whole-value change.
pub fn diff_and_clone(current: &Value, previous: Option<&Value>) -> Option<DiffOutcome> {
    let Some(previous) = previous else {
        return Some(DiffOutcome::whole(current));
    };
    if current == previous {
        return None;
    }

    let mut changes = Patch::new();
    let mut path = String::new();
    if collect_changes(current, previous, &mut path, &mut changes) {
        return Some(DiffOutcome::whole(current));
    }

    Some(DiffOutcome {
        clone: current.clone(),
        changes: Some(changes),
    })
}

/// Returns true when `current` has to replace `previous` wholesale.
/// Otherwise the differing members have been recorded in `out`.
fn collect_changes(current: &Value, previous: &Value, path: &mut String, out: &mut Patch) -> bool {
    match (current, previous) {
        (Value::Object(cur), Value::Object(prev)) => {
            if prev.keys().any(|key| !cur.contains_key(key)) {
                return true;
            }
            for (key, value) in cur {
                let old = prev.get(key);
                if old == Some(value) {
                    continue;
                }
                let len = path.len();
                path.push('.');
                path.push_str(key);
                descend(value, old, path, out);
                path.truncate(len);
            }
            false
        }
        (Value::Array(cur), Value::Array(prev)) => {
            if cur.len() < prev.len() {
                return true;
            }
            for (index, value) in cur.iter().enumerate() {
                let old = prev.get(index);
                if old == Some(value) {
                    continue;
                }
                let len = path.len();
                path.push('[');
                path.push_str(&index.to_string());
                path.push(']');
                descend(value, old, path, out);
                path.truncate(len);
            }
            false
        }
        _ => true,
    }
}

fn descend(value: &Value, old: Option<&Value>, path: &mut String, out: &mut Patch) {
    let whole = match old {
        Some(old) => collect_changes(value, old, path, out),
        None => true,
    };
    if whole {
        out.insert(path.clone(), value.clone());
    }
}

/// Top-level keys allowed to reach the render backend.
///
/// Grows while a controller initializes and never shrinks afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalKeys {
    keys: IndexSet<String>,
}

impl LocalKeys {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>) {
        self.keys.insert(key.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    /// Whether a patch entry keyed by `path` may be sent.
    pub fn allows(&self, path: &str) -> bool {
        self.keys.contains(first_key(path))
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

impl<S: Into<String>> Extend<S> for LocalKeys {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for key in iter {
            self.insert(key);
        }
    }
}

impl<S: Into<String>> FromIterator<S> for LocalKeys {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut keys = Self::new();
        keys.extend(iter);
        keys
    }
}

/// Drop entries whose path has an ancestor path present in the same map.
/// The ancestor's value already covers them.
pub fn preprocess_render_data(raw: Patch) -> Patch {
    let keys: Vec<String> = raw.keys().cloned().collect();
    raw.into_iter()
        .filter(|(key, _)| {
            !keys
                .iter()
                .any(|other| crate::path::sub_path_of(key, other).is_some())
        })
        .collect()
}
