//! Computed properties and user watches.

use std::sync::Arc;

use serde_json::Value;
use tracing::error;

use super::{
    ComputedEntry, ComputedGetter, Controller, WatchCallback, WatchHandler, WatchOptions,
    WatchSource, WeakController,
};
use crate::error::ControllerError;
use crate::path::Path;
use crate::reactive::{Callback, Getter, Watcher, WatcherKind, WatcherOptions};

/// Handle returned by [`Controller::watch`].
#[must_use = "dropping an Unwatch keeps the watch alive; call `unwatch` to stop it"]
pub struct Unwatch {
    controller: WeakController,
    watcher: Watcher,
}

impl Unwatch {
    /// Stop the watch: drop its Dep subscriptions and forget it.
    pub fn unwatch(self) {
        self.watcher.teardown();
        if let Some(controller) = self.controller.upgrade() {
            let id = self.watcher.id();
            controller.inner.watchers.lock().retain(|w| w.id() != id);
        }
    }
}

/// Evaluate a computed definition against whatever controller is still alive.
fn computed_getter(weak: WeakController, get: ComputedGetter) -> Getter {
    Arc::new(move || match weak.upgrade() {
        Some(controller) => get(&controller),
        None => Value::Null,
    })
}

impl Controller {
    /// Read a computed property, evaluating it if it is stale.
    pub fn computed(&self, key: &str) -> Option<Value> {
        let watcher = self
            .inner
            .computed
            .lock()
            .get(key)
            .map(|entry| entry.watcher.clone())?;

        if self.is_destroyed() {
            return Some(watcher.value());
        }
        if watcher.is_dirty() {
            watcher.evaluate();
        }
        if self.tracker().is_active() {
            watcher.depend();
        }
        Some(watcher.value())
    }

    /// Write a computed property through its setter.
    pub fn set_computed(&self, key: &str, value: Value) -> Result<(), ControllerError> {
        if self.is_destroyed() {
            return Err(ControllerError::Destroyed(self.name().to_string()));
        }

        let setter = {
            let computed = self.inner.computed.lock();
            let entry = computed
                .get(key)
                .ok_or_else(|| ControllerError::UnknownComputed(key.to_string()))?;
            entry
                .setter
                .clone()
                .ok_or_else(|| ControllerError::ReadOnlyComputed(key.to_string()))?
        };

        self.tracker().untracked(|| setter(self, value));
        Ok(())
    }

    pub(crate) fn init_computed(&self) {
        let Some(store) = self.store() else {
            return;
        };

        for (key, def) in &self.inner.options.computed {
            if store.contains_key(key) {
                error!(
                    component = %self.name(),
                    key = %key,
                    "computed key is already defined as data or a prop, keeping the data value"
                );
                continue;
            }

            let watcher = Watcher::new(
                WatcherKind::Computed,
                computed_getter(self.downgrade(), def.get.clone()),
                None,
                WatcherOptions::lazy(),
                self.tracker().clone(),
                self.scheduler().clone(),
            );
            self.inner.computed.lock().insert(
                key.clone(),
                ComputedEntry {
                    watcher,
                    setter: def.set.clone(),
                },
            );
        }
    }

    pub(crate) fn init_watch(&self) {
        for (key, handlers) in &self.inner.options.watch {
            for handler in handlers {
                if let Err(err) = self.watch(key.as_str(), handler.clone()) {
                    error!(component = %self.name(), key = %key, error = %err, "failed to register watch");
                }
            }
        }
    }

    /// Watch a path or getter.
    ///
    /// The handler fires with `(new, old)` whenever the watched value
    /// changes; by default on the next scheduler flush.
    pub fn watch(
        &self,
        source: impl Into<WatchSource>,
        handler: WatchHandler,
    ) -> Result<Unwatch, ControllerError> {
        if self.is_destroyed() {
            return Err(ControllerError::Destroyed(self.name().to_string()));
        }

        let (callback, options) = self.resolve_handler(handler, WatchOptions::default())?;

        let weak = self.downgrade();
        let getter: Getter = match source.into() {
            WatchSource::Path(raw) => {
                let path = Path::parse(&raw)?;
                let deep = options.deep;
                Arc::new(move || {
                    weak.upgrade()
                        .and_then(|controller| controller.read(&path, deep))
                        .unwrap_or(Value::Null)
                })
            }
            WatchSource::Getter(get) => computed_getter(weak, get),
        };

        let weak = self.downgrade();
        let user_callback = callback.clone();
        let on_change: Callback = Arc::new(move |new, old| {
            if let Some(controller) = weak.upgrade() {
                user_callback(&controller, new, old);
            }
        });

        let watcher = Watcher::new(
            WatcherKind::User,
            getter,
            Some(on_change),
            WatcherOptions {
                lazy: false,
                sync: options.sync,
            },
            self.tracker().clone(),
            self.scheduler().clone(),
        );
        self.inner.watchers.lock().push(watcher.clone());

        if options.immediate {
            let value = watcher.value();
            self.tracker().untracked(|| callback(self, &value, &Value::Null));
        }

        Ok(Unwatch {
            controller: self.downgrade(),
            watcher,
        })
    }

    /// Flatten a handler declaration into one callback. Options on an outer
    /// `Configured` layer win over inner ones.
    fn resolve_handler(
        &self,
        handler: WatchHandler,
        options: WatchOptions,
    ) -> Result<(WatchCallback, WatchOptions), ControllerError> {
        match handler {
            WatchHandler::Function(f) => Ok((f, options)),
            WatchHandler::Method(name) => {
                let method = self
                    .inner
                    .options
                    .methods
                    .get(&name)
                    .cloned()
                    .ok_or(ControllerError::UnknownMethod(name))?;
                let callback: WatchCallback = Arc::new(move |controller, new, old| {
                    method(controller, &[new.clone(), old.clone()]);
                });
                Ok((callback, options))
            }
            WatchHandler::Configured {
                handler,
                options: declared,
            } => {
                let (callback, _) = self.resolve_handler(*handler, options)?;
                Ok((callback, declared))
            }
        }
    }
}
