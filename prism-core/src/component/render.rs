//! Rendering: the render watcher, diff dispatch and forced updates.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use super::{Completion, Controller, RenderTask};
use crate::diff::{preprocess_render_data, Patch, RenderSnapshot};
use crate::error::ControllerError;
use crate::path::Path;
use crate::reactive::{Getter, Watcher, WatcherKind, WatcherOptions};
use crate::scheduler::Task;

impl Controller {
    /// Create the render watcher. It evaluates right away, which produces
    /// the first patch.
    pub(crate) fn init_render(&self) {
        let weak = self.downgrade();
        let getter: Getter = Arc::new(move || {
            if let Some(controller) = weak.upgrade() {
                controller.render_pass();
            }
            Value::Null
        });

        let watcher = Watcher::new(
            WatcherKind::Render,
            getter,
            None,
            WatcherOptions::default(),
            self.tracker().clone(),
            self.scheduler().clone(),
        );
        *self.inner.render_watcher.lock() = Some(watcher.clone());
        self.inner.watchers.lock().push(watcher);
    }

    /// One evaluation of the render watcher.
    fn render_pass(&self) {
        if self.is_destroyed() {
            return;
        }

        let result = match self.inner.host.injected_render.clone() {
            Some(injected) => match injected(self) {
                Ok(raw) => self.render_with_data(raw),
                Err(err) => {
                    if !self.inner.config.ignore_render_error {
                        warn!(
                            component = %self.name(),
                            error = %err,
                            "render function failed, falling back to full data render"
                        );
                    }
                    self.render()
                }
            },
            None => self.render(),
        };

        if let Err(err) = result {
            error!(component = %self.name(), error = %err, "render failed");
        }
    }

    /// Render every eligible data field and computed value.
    pub fn render(&self) -> Result<(), ControllerError> {
        if self.is_destroyed() {
            return Ok(());
        }

        let mut render_data = Patch::new();
        for key in self.local_keys().iter() {
            if let Some(value) = self.read(&Path::key(key), true) {
                render_data.insert(key.to_string(), value);
            }
        }
        self.diff_and_render(render_data)
    }

    /// Render the output of a compiled render function. Entries shadowed by
    /// an ancestor entry in the same map are dropped first.
    pub fn render_with_data(&self, raw: Patch) -> Result<(), ControllerError> {
        if self.is_destroyed() {
            return Ok(());
        }
        self.diff_and_render(preprocess_render_data(raw))
    }

    fn diff_and_render(&self, render_data: Patch) -> Result<(), ControllerError> {
        let keys = self.local_keys();
        let strict = self.inner.config.use_strict_diff;

        let patch = {
            let mut snapshot = self.inner.snapshot.lock();
            match snapshot.as_mut() {
                Some(snapshot) if strict => snapshot.diff_strict(&render_data, &keys),
                Some(snapshot) => snapshot.diff_loose(&render_data, &keys),
                None => {
                    let (first, patch) = if strict {
                        let initial = self.inner.initial_data.lock();
                        RenderSnapshot::first_strict(&render_data, &keys, &initial)
                    } else {
                        RenderSnapshot::first_loose(&render_data, &keys)
                    };
                    *snapshot = Some(first);
                    patch
                }
            }
        };

        self.do_render(patch, None)
    }

    /// Decide which render task, if any, this dispatch creates. Returns the
    /// task the sink completion has to resolve.
    fn render_task_executor(&self, is_empty: bool) -> Option<RenderTask> {
        let mounted = self.is_mounted();
        let mut current = self.inner.cur_render_task.lock();
        if (!mounted && current.is_some()) || (mounted && is_empty) {
            return None;
        }

        let task = RenderTask::new();
        *current = Some(task.clone());
        // Before mount the task is resolved by `mounted()`.
        mounted.then_some(task)
    }

    /// Send a patch, merged with any pending forced-update overlay, to the
    /// render sink.
    pub(crate) fn do_render(
        &self,
        patch: Patch,
        callback: Option<Completion>,
    ) -> Result<(), ControllerError> {
        let Some(sink) = self.inner.host.render.clone() else {
            return Err(ControllerError::MissingRenderSink(self.name().to_string()));
        };

        let overlay = std::mem::take(&mut *self.inner.force_update_data.lock());
        let data = if overlay.is_empty() {
            patch
        } else {
            let keys = self.local_keys();
            let mut merged: Patch = overlay
                .into_iter()
                .filter(|(key, _)| keys.allows(key))
                .collect();
            merged.extend(patch);
            merged
        };

        // Classified after filtering: an overlay of foreign keys alone is
        // still an empty render.
        let is_empty = data.is_empty();
        let resolve = self.render_task_executor(is_empty);

        if is_empty {
            if let Some(callback) = callback {
                callback.complete();
            }
            return Ok(());
        }

        let completion = if self.is_mounted() {
            let weak = self.downgrade();
            Some(Completion::new(move || {
                if let Some(controller) = weak.upgrade() {
                    controller.updated();
                }
                if let Some(callback) = callback {
                    callback.complete();
                }
                if let Some(task) = resolve {
                    task.resolve();
                }
            }))
        } else {
            callback
        };

        debug!(component = %self.name(), entries = data.len(), "dispatching patch");
        self.tracker().untracked(|| sink(data, completion));
        Ok(())
    }

    /// Write `data` through the store and make sure the next render sends
    /// it, whether or not the store saw a change. The callback runs after
    /// that render has been painted.
    pub fn force_update(
        &self,
        data: Option<Map<String, Value>>,
        callback: Option<Completion>,
    ) -> Result<(), ControllerError> {
        if self.is_destroyed() {
            return Err(ControllerError::Destroyed(self.name().to_string()));
        }

        if let Some(data) = data {
            let entries = data
                .into_iter()
                .map(|(key, value)| Ok((Path::parse(&key)?, key, value)))
                .collect::<Result<Vec<_>, ControllerError>>()?;

            let keys = self.local_keys();
            for (path, key, value) in entries {
                if !keys.allows(&key) {
                    warn!(
                        component = %self.name(),
                        key = %key,
                        "forced update names a key the component does not own, it will not be rendered"
                    );
                }
                self.write(&path, value.clone())?;
                self.inner.force_update_data.lock().insert(key, value);
            }
        }

        if let Some(callback) = callback {
            self.next_tick(move || callback.complete());
        }

        let render_watcher = self.inner.render_watcher.lock().clone();
        match render_watcher {
            // Queue a render even if nothing it reads changed.
            Some(watcher) => {
                watcher.schedule();
                Ok(())
            }
            None => self.do_render(Patch::new(), None),
        }
    }

    /// Alias of [`force_update`](Self::force_update) with data.
    pub fn set_data(
        &self,
        data: Map<String, Value>,
        callback: Option<Completion>,
    ) -> Result<(), ControllerError> {
        self.force_update(Some(data), callback)
    }

    /// Run `f` on the next scheduler flush, after the latest dispatched
    /// render has been painted.
    pub fn next_tick<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let weak = self.downgrade();
        self.scheduler().queue(Task::new(move || {
            match weak.upgrade().and_then(|controller| controller.render_task()) {
                Some(task) => task.then(f),
                None => f(),
            }
        }));
    }

    #[deprecated(note = "use `next_tick`")]
    pub fn on_updated<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        warn!(component = %self.name(), "on_updated is deprecated, use next_tick instead");
        self.next_tick(f);
    }
}
