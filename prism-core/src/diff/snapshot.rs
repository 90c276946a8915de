//! Render Snapshot
//!
//! The snapshot records what the backend has been sent, keyed the same way
//! the patches were keyed. Every render diffs against it and updates it.
//!
//! # Variants
//!
//! | render      | loose                         | strict                                   |
//! |-------------|-------------------------------|------------------------------------------|
//! | first       | send every eligible value     | diff against the host's initial data     |
//! | subsequent  | whole values that changed     | sub-path entries, path reconciliation    |
//!
//! # Path Reconciliation (strict)
//!
//! Render data may be keyed by paths (`list[0].title`), and the key set can
//! shift between renders. For each incoming key the strict variant checks, in
//! order:
//!
//! 1. the key is tracked: diff against it
//! 2. the key is an ancestor of tracked keys: the coarser key supersedes them
//! 3. the key is a descendant of a tracked key: diff inside the tracked value
//! 4. otherwise: a new key, sent in full
//!
//! After every render no two tracked keys are ancestor and descendant of each
//! other, so there is always exactly one authoritative baseline per location.

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use super::{diff_and_clone, LocalKeys, Patch};
use crate::path::{first_key, get_in_map, parse_relative, slot_mut, sub_path_of, Path};

/// Last state believed visible to the render backend.
///
/// Serializes as the flat path-keyed object, which is what hosts log when a
/// backend and controller disagree.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct RenderSnapshot {
    entries: IndexMap<String, Value>,
}

impl RenderSnapshot {
    /// First render, loose: everything eligible is sent and remembered.
    pub fn first_loose(render_data: &Patch, keys: &LocalKeys) -> (Self, Patch) {
        let mut snapshot = Self::default();
        let mut patch = Patch::new();

        for (key, value) in render_data {
            if keys.allows(key) {
                snapshot.entries.insert(key.clone(), value.clone());
                patch.insert(key.clone(), value.clone());
            }
        }

        (snapshot, patch)
    }

    /// First render, strict: values the host already rendered from its
    /// initial data are only sent where they differ from it.
    pub fn first_strict(
        render_data: &Patch,
        keys: &LocalKeys,
        initial_data: &Map<String, Value>,
    ) -> (Self, Patch) {
        let mut snapshot = Self::default();
        let mut patch = Patch::new();

        for (key, value) in render_data {
            if !keys.allows(key) {
                continue;
            }

            if !initial_data.contains_key(first_key(key)) {
                snapshot.entries.insert(key.clone(), value.clone());
                patch.insert(key.clone(), value.clone());
                continue;
            }

            let initial = Path::parse(key)
                .ok()
                .and_then(|path| get_in_map(initial_data, &path));
            match diff_and_clone(value, initial) {
                Some(outcome) => {
                    outcome.emit_into(&mut patch, key);
                    snapshot.entries.insert(key.clone(), outcome.clone);
                }
                None => {
                    snapshot.entries.insert(key.clone(), value.clone());
                }
            }
        }

        (snapshot, patch)
    }

    /// Subsequent render, loose: send whole values that differ from the
    /// snapshot and forget keys this render no longer produces.
    pub fn diff_loose(&mut self, render_data: &Patch, keys: &LocalKeys) -> Patch {
        let mut patch = Patch::new();
        let mut missed: Vec<String> = self.entries.keys().cloned().collect();

        for (key, value) in render_data {
            if keys.allows(key) && self.entries.get(key) != Some(value) {
                self.entries.insert(key.clone(), value.clone());
                patch.insert(key.clone(), value.clone());
            }
            missed.retain(|tracked| tracked != key);
        }

        for key in missed {
            self.entries.shift_remove(&key);
        }

        patch
    }

    /// Subsequent render, strict: sub-path patches with path reconciliation.
    pub fn diff_strict(&mut self, render_data: &Patch, keys: &LocalKeys) -> Patch {
        let mut patch = Patch::new();

        for (key, value) in render_data {
            if !keys.allows(key) {
                continue;
            }

            if let Some(tracked) = self.entries.get(key) {
                if let Some(outcome) = diff_and_clone(value, Some(tracked)) {
                    outcome.emit_into(&mut patch, key);
                    self.entries.insert(key.clone(), outcome.clone);
                }
                continue;
            }

            if !self.reconcile(key, value, &mut patch) {
                self.entries.insert(key.clone(), value.clone());
                patch.insert(key.clone(), value.clone());
            }
        }

        patch
    }

    /// Handle an untracked `key` that overlaps tracked keys. Returns false
    /// when it overlaps nothing.
    fn reconcile(&mut self, key: &str, value: &Value, patch: &mut Patch) -> bool {
        let tracked: Vec<String> = self.entries.keys().cloned().collect();

        // Tracked descendants: all of them give way to the coarser key.
        let descendants: Vec<&String> = tracked
            .iter()
            .filter(|tracked| sub_path_of(tracked, key).is_some())
            .collect();
        if !descendants.is_empty() {
            for descendant in descendants {
                self.entries.shift_remove(descendant);
            }
            self.entries.insert(key.to_string(), value.clone());
            patch.insert(key.to_string(), value.clone());
            return true;
        }

        // A tracked ancestor: diff inside it. At most one can exist while no
        // two tracked keys overlap.
        for ancestor in &tracked {
            let Some(rest) = sub_path_of(key, ancestor) else {
                continue;
            };
            let relative = match parse_relative(rest) {
                Ok(relative) => relative,
                Err(err) => {
                    warn!(key, error = %err, "unparseable render path, sending it whole");
                    return false;
                }
            };
            let Some(root) = self.entries.get_mut(ancestor) else {
                continue;
            };
            let slot = match slot_mut(root, &relative) {
                Ok(slot) => slot,
                Err(err) => {
                    // Tracking it would overlap the ancestor.
                    warn!(key, error = %err, "render path past the end of the snapshot, sending it untracked");
                    patch.insert(key.to_string(), value.clone());
                    return true;
                }
            };
            if let Some(outcome) = diff_and_clone(value, Some(slot)) {
                outcome.emit_into(patch, key);
                *slot = outcome.clone;
            }
            return true;
        }

        false
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any two tracked keys are ancestor and descendant.
    pub fn has_overlapping_keys(&self) -> bool {
        self.entries.keys().any(|a| {
            self.entries
                .keys()
                .any(|b| sub_path_of(a, b).is_some())
        })
    }

    pub fn into_entries(self) -> IndexMap<String, Value> {
        self.entries
    }
}
