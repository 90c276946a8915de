//! Component Reactive Controller
//!
//! One controller drives one component instance. It owns the reactive store,
//! the watchers, the render snapshot and the update bookkeeping, and it is the
//! only thing that talks to the render backend.
//!
//! # Lifecycle
//!
//! ```text
//! Initial --created()--> Created --mounted()--> Mounted --destroyed()--> Destroyed
//! ```
//!
//! Transitions are linear. `mounted()` only acts from `Created`, `updated()`
//! only while `Mounted`, and `destroyed()` is terminal: afterwards writes
//! fail, renders are skipped and computed properties stop re-evaluating.
//!
//! # Render Pipeline
//!
//! 1. A write notifies the store's Deps.
//! 2. The render watcher is queued on the scheduler.
//! 3. On flush it builds render data (or calls the injected render function)
//!    and diffs it against the snapshot.
//! 4. A non-empty patch goes to the host's render sink together with a
//!    completion that, after mount, surfaces the `updated` hook.

mod host;
mod options;
mod render;
mod task;
mod watch;

pub use host::{Completion, HostBindings, InitialDataFn, InjectedRender, RenderSink};
pub use options::{
    ComponentOptions, ComputedDef, ComputedGetter, ComputedSetter, DataFn, Hook, HookKind,
    Method, WatchCallback, WatchHandler, WatchOptions, WatchSource,
};
pub use task::{AsyncLock, RenderTask};
pub use watch::Unwatch;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tracing::{debug, error};

use crate::config::RuntimeConfig;
use crate::diff::{LocalKeys, Patch, RenderSnapshot};
use crate::error::ControllerError;
use crate::path::{get_by_path, parse_relative, Path};
use crate::reactive::{ReactiveStore, Tracker, Watcher};
use crate::scheduler::Scheduler;

/// Data key carrying the controller id, so backends can scope selectors to
/// one component instance.
pub const CID_KEY: &str = "__cid";

/// Lifecycle state of a controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Initial,
    Created,
    Mounted,
    Destroyed,
}

fn next_controller_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

struct ComputedEntry {
    watcher: Watcher,
    setter: Option<ComputedSetter>,
}

pub(crate) struct ControllerInner {
    id: u64,
    options: ComponentOptions,
    host: HostBindings,
    config: RuntimeConfig,
    scheduler: Arc<dyn Scheduler>,
    tracker: Arc<Tracker>,
    state: Mutex<LifecycleState>,
    store: OnceLock<ReactiveStore>,
    initial_data: Mutex<Map<String, Value>>,
    local_keys: RwLock<LocalKeys>,
    computed: Mutex<IndexMap<String, ComputedEntry>>,
    /// Render and user watchers, torn down on destroy.
    watchers: Mutex<Vec<Watcher>>,
    render_watcher: Mutex<Option<Watcher>>,
    snapshot: Mutex<Option<RenderSnapshot>>,
    force_update_data: Mutex<Patch>,
    cur_render_task: Mutex<Option<RenderTask>>,
    update_lock: AsyncLock,
}

/// Handle to a component controller. Clones share the same instance.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

/// Weak handle used by closures the controller itself owns.
#[derive(Clone)]
pub(crate) struct WeakController(Weak<ControllerInner>);

impl WeakController {
    pub(crate) fn upgrade(&self) -> Option<Controller> {
        self.0.upgrade().map(|inner| Controller { inner })
    }
}

impl Controller {
    pub fn new(
        options: ComponentOptions,
        host: HostBindings,
        scheduler: Arc<dyn Scheduler>,
        config: RuntimeConfig,
    ) -> Self {
        let local_keys = options.computed.keys().cloned().collect();
        Self {
            inner: Arc::new(ControllerInner {
                id: next_controller_id(),
                options,
                host,
                config,
                scheduler,
                tracker: Arc::new(Tracker::new()),
                state: Mutex::new(LifecycleState::Initial),
                store: OnceLock::new(),
                initial_data: Mutex::new(Map::new()),
                local_keys: RwLock::new(local_keys),
                computed: Mutex::new(IndexMap::new()),
                watchers: Mutex::new(Vec::new()),
                render_watcher: Mutex::new(None),
                snapshot: Mutex::new(None),
                force_update_data: Mutex::new(Patch::new()),
                cur_render_task: Mutex::new(None),
                update_lock: AsyncLock::new(),
            }),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakController {
        WeakController(Arc::downgrade(&self.inner))
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.lock()
    }

    pub fn is_mounted(&self) -> bool {
        self.state() == LifecycleState::Mounted
    }

    pub fn is_destroyed(&self) -> bool {
        self.state() == LifecycleState::Destroyed
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Keys eligible for rendering.
    pub fn local_keys(&self) -> LocalKeys {
        self.inner.local_keys.read().clone()
    }

    /// Data the host supplied before the controller's own fields were mixed in.
    pub fn initial_data(&self) -> Map<String, Value> {
        self.inner.initial_data.lock().clone()
    }

    /// What the backend has been sent so far, `None` before the first render.
    pub fn snapshot(&self) -> Option<RenderSnapshot> {
        self.inner.snapshot.lock().clone()
    }

    /// Patch entries waiting to be merged into the next render.
    pub fn pending_force_update(&self) -> Patch {
        self.inner.force_update_data.lock().clone()
    }

    /// The completion token of the latest dispatched render.
    pub fn render_task(&self) -> Option<RenderTask> {
        self.inner.cur_render_task.lock().clone()
    }

    /// Render and user watchers still registered.
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.lock().len()
    }

    /// Subscriptions currently registered on the store's Deps, across all
    /// watchers.
    pub fn live_subscriptions(&self) -> usize {
        self.store().map_or(0, ReactiveStore::subscriber_count)
    }

    pub(crate) fn store(&self) -> Option<&ReactiveStore> {
        self.inner.store.get()
    }

    pub(crate) fn tracker(&self) -> &Arc<Tracker> {
        &self.inner.tracker
    }

    pub(crate) fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.inner.scheduler
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Build the reactive state and produce the first render.
    pub fn created(&self) -> Result<(), ControllerError> {
        if self.state() != LifecycleState::Initial {
            debug!(component = %self.name(), "created() called twice, ignoring");
            return Ok(());
        }

        let Some(supplier) = self.inner.host.initial_data.clone() else {
            error!(component = %self.name(), "no initial data supplier, cannot create component");
            return Err(ControllerError::MissingInitialData(self.name().to_string()));
        };
        let initial = supplier();
        *self.inner.initial_data.lock() = initial.clone();

        self.call_hook(HookKind::BeforeCreate);
        self.init_state(initial);
        *self.inner.state.lock() = LifecycleState::Created;
        self.call_hook(HookKind::Created);

        if self.inner.host.render.is_none() {
            error!(component = %self.name(), "no render sink, cannot render component");
            return Err(ControllerError::MissingRenderSink(self.name().to_string()));
        }

        if self.inner.options.native_render {
            let full = self.eligible_data();
            self.force_update(Some(full), None)
        } else {
            self.init_render();
            Ok(())
        }
    }

    /// First paint is done. Acts only once, from `Created`.
    pub fn mounted(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state != LifecycleState::Created {
                return;
            }
            *state = LifecycleState::Mounted;
        }

        self.call_hook(HookKind::BeforeMount);
        self.call_hook(HookKind::Mounted);

        let task = self.inner.cur_render_task.lock().clone();
        if let Some(task) = task {
            task.resolve();
        }
    }

    /// A patch was applied after mount. Overlapping calls collapse into one
    /// queued `updated` hook, which re-checks the state when it runs.
    pub fn updated(&self) {
        if !self.is_mounted() {
            return;
        }

        let weak = self.downgrade();
        self.inner.update_lock.run(self.inner.scheduler.as_ref(), move || {
            if let Some(controller) = weak.upgrade() {
                if controller.is_mounted() {
                    controller.call_hook(HookKind::Updated);
                }
            }
        });
    }

    /// Tear down every render and user watcher and enter the terminal state.
    pub fn destroyed(&self) {
        if self.is_destroyed() {
            return;
        }

        self.clear_watchers();
        *self.inner.state.lock() = LifecycleState::Destroyed;
        self.call_hook(HookKind::Destroyed);
    }

    fn clear_watchers(&self) {
        self.inner.render_watcher.lock().take();
        let watchers = std::mem::take(&mut *self.inner.watchers.lock());
        for watcher in watchers.iter().rev() {
            watcher.teardown();
        }
        // Computed watchers keep their cached values for reads after destroy.
        let computed: Vec<Watcher> = self
            .inner
            .computed
            .lock()
            .values()
            .map(|entry| entry.watcher.clone())
            .collect();
        for watcher in computed {
            watcher.teardown();
        }
    }

    fn call_hook(&self, kind: HookKind) {
        if let Some(hook) = self.inner.options.hooks.get(&kind).cloned() {
            self.inner.tracker.untracked(|| hook(self));
        }
    }

    // ------------------------------------------------------------------------
    // State initialization
    // ------------------------------------------------------------------------

    fn init_state(&self, initial: Map<String, Value>) {
        let mut declared = Map::new();
        declared.insert(CID_KEY.to_string(), Value::from(self.inner.id));
        if let Some(data_fn) = &self.inner.options.data_fn {
            declared.extend(data_fn(&initial));
        }
        declared.extend(self.inner.options.data.clone());

        self.inner.local_keys.write().extend(declared.keys().cloned());

        let mut data = initial;
        data.extend(declared);
        // Only `created` initializes the store, guarded by the state check.
        let _ = self
            .inner
            .store
            .set(ReactiveStore::new(data, self.inner.tracker.clone()));

        self.init_computed();
        self.init_watch();
    }

    /// Top-level data plus computed values, restricted to eligible keys,
    /// read without tracking.
    fn eligible_data(&self) -> Map<String, Value> {
        let keys = self.local_keys();
        let mut out = Map::new();
        if let Some(store) = self.store() {
            for (key, value) in store.snapshot() {
                if keys.contains(&key) {
                    out.insert(key, value);
                }
            }
        }
        let computed: Vec<String> = self.inner.computed.lock().keys().cloned().collect();
        for key in computed {
            if let Some(value) = self.inner.tracker.untracked(|| self.computed(&key)) {
                out.insert(key, value);
            }
        }
        out
    }

    // ------------------------------------------------------------------------
    // Data access
    // ------------------------------------------------------------------------

    /// Read a field path (data or computed), recording a dependency if a
    /// watcher is evaluating.
    pub fn get(&self, path: &str) -> Option<Value> {
        let path = Path::parse(path).ok()?;
        self.read(&path, false)
    }

    /// Like [`get`](Self::get) but depends on the whole subtree.
    pub fn get_deep(&self, path: &str) -> Option<Value> {
        let path = Path::parse(path).ok()?;
        self.read(&path, true)
    }

    pub(crate) fn read(&self, path: &Path, deep: bool) -> Option<Value> {
        let first = path.first_key()?;
        let store = self.store()?;
        if store.contains_key(first) || !self.inner.computed.lock().contains_key(first) {
            return if deep { store.get_deep(path) } else { store.get(path) };
        }

        let value = self.computed(first)?;
        if path.len() == 1 {
            return Some(value);
        }
        let full = path.to_string();
        let relative = parse_relative(&full[first.len()..]).ok()?;
        get_by_path(&value, &relative).cloned()
    }

    /// Write a field path through the store, notifying dependents.
    pub fn set(&self, path: &str, value: Value) -> Result<(), ControllerError> {
        if self.is_destroyed() {
            return Err(ControllerError::Destroyed(self.name().to_string()));
        }
        let path = Path::parse(path)?;
        self.write(&path, value)
    }

    /// Store write, routed to the computed setter when `path` names a
    /// computed property.
    pub(crate) fn write(&self, path: &Path, value: Value) -> Result<(), ControllerError> {
        let Some(store) = self.store() else {
            return Ok(());
        };
        if let Some(first) = path.first_key() {
            let is_computed =
                !store.contains_key(first) && self.inner.computed.lock().contains_key(first);
            if is_computed {
                if path.len() > 1 {
                    debug!(component = %self.name(), path = %path, "ignoring write below a computed value");
                } else if let Err(err) = self.set_computed(first, value) {
                    debug!(component = %self.name(), error = %err, "computed write skipped");
                }
                return Ok(());
            }
        }
        store.set(path, value)?;
        Ok(())
    }

    /// Call a method declared in the component options.
    pub fn call_method(&self, name: &str, args: &[Value]) -> Result<Value, ControllerError> {
        let method = self
            .inner
            .options
            .methods
            .get(name)
            .cloned()
            .ok_or_else(|| ControllerError::UnknownMethod(name.to_string()))?;
        Ok(method(self, args))
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("id", &self.inner.id)
            .field("name", &self.inner.options.name)
            .field("state", &self.state())
            .field("watchers", &self.watcher_count())
            .finish()
    }
}
