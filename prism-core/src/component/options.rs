//! Component definitions.
//!
//! [`ComponentOptions`] is what a compiled component hands to its controller:
//! declared data, computed properties, watches, methods and lifecycle hooks.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use super::Controller;

/// Lifecycle hook body.
pub type Hook = Arc<dyn Fn(&Controller) + Send + Sync>;

/// Host method, callable by name from watch handlers.
pub type Method = Arc<dyn Fn(&Controller, &[Value]) -> Value + Send + Sync>;

/// Watch callback, invoked with `(new, old)`.
pub type WatchCallback = Arc<dyn Fn(&Controller, &Value, &Value) + Send + Sync>;

/// Getter for computed properties and function watch sources.
pub type ComputedGetter = Arc<dyn Fn(&Controller) -> Value + Send + Sync>;

/// Setter for writable computed properties.
pub type ComputedSetter = Arc<dyn Fn(&Controller, Value) + Send + Sync>;

/// Builds declared data from the host's initial data (props).
pub type DataFn = Arc<dyn Fn(&Map<String, Value>) -> Map<String, Value> + Send + Sync>;

/// Points in the lifecycle a hook can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    BeforeCreate,
    Created,
    BeforeMount,
    Mounted,
    Updated,
    Destroyed,
}

/// A computed property.
#[derive(Clone)]
pub struct ComputedDef {
    pub get: ComputedGetter,
    pub set: Option<ComputedSetter>,
}

impl ComputedDef {
    pub fn new<F>(get: F) -> Self
    where
        F: Fn(&Controller) -> Value + Send + Sync + 'static,
    {
        Self {
            get: Arc::new(get),
            set: None,
        }
    }

    pub fn with_setter<S>(mut self, set: S) -> Self
    where
        S: Fn(&Controller, Value) + Send + Sync + 'static,
    {
        self.set = Some(Arc::new(set));
        self
    }
}

/// What a watch observes.
#[derive(Clone)]
pub enum WatchSource {
    /// A field path such as `user.name`; computed keys are allowed.
    Path(String),
    /// Any tracked computation over the controller.
    Getter(ComputedGetter),
}

impl WatchSource {
    pub fn getter<F>(get: F) -> Self
    where
        F: Fn(&Controller) -> Value + Send + Sync + 'static,
    {
        Self::Getter(Arc::new(get))
    }
}

impl From<&str> for WatchSource {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

impl From<String> for WatchSource {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

/// Watch behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchOptions {
    /// Call the handler once at registration with the current value.
    pub immediate: bool,
    /// Also react to changes nested below a path source.
    pub deep: bool,
    /// Run the handler as soon as the source changes instead of on the next
    /// scheduler flush.
    pub sync: bool,
}

/// The shapes a watch handler can be declared in.
///
/// Resolved once at registration into a single [`WatchCallback`].
#[derive(Clone)]
pub enum WatchHandler {
    Function(WatchCallback),
    /// Name of a method in [`ComponentOptions::methods`].
    Method(String),
    Configured {
        handler: Box<WatchHandler>,
        options: WatchOptions,
    },
}

impl WatchHandler {
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&Controller, &Value, &Value) + Send + Sync + 'static,
    {
        Self::Function(Arc::new(f))
    }

    pub fn method(name: impl Into<String>) -> Self {
        Self::Method(name.into())
    }

    pub fn with_options(self, options: WatchOptions) -> Self {
        Self::Configured {
            handler: Box::new(self),
            options,
        }
    }
}

impl fmt::Debug for WatchHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Function(_) => f.write_str("Function"),
            Self::Method(name) => f.debug_tuple("Method").field(name).finish(),
            Self::Configured { handler, options } => f
                .debug_struct("Configured")
                .field("handler", handler)
                .field("options", options)
                .finish(),
        }
    }
}

/// Declarative definition of a component.
#[derive(Clone, Default)]
pub struct ComponentOptions {
    pub name: String,
    pub data: Map<String, Value>,
    pub data_fn: Option<DataFn>,
    pub computed: IndexMap<String, ComputedDef>,
    pub watch: IndexMap<String, Vec<WatchHandler>>,
    pub methods: IndexMap<String, Method>,
    pub hooks: HashMap<HookKind, Hook>,
    /// Skip the render watcher; the host re-renders only through
    /// `set_data` / `force_update`.
    pub native_render: bool,
}

impl ComponentOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declared data. Non-object values are ignored.
    pub fn data(mut self, data: Value) -> Self {
        if let Value::Object(map) = data {
            self.data.extend(map);
        }
        self
    }

    pub fn data_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Map<String, Value>) -> Map<String, Value> + Send + Sync + 'static,
    {
        self.data_fn = Some(Arc::new(f));
        self
    }

    pub fn computed(mut self, key: impl Into<String>, def: ComputedDef) -> Self {
        self.computed.insert(key.into(), def);
        self
    }

    pub fn watch(mut self, key: impl Into<String>, handler: WatchHandler) -> Self {
        self.watch.entry(key.into()).or_default().push(handler);
        self
    }

    pub fn method<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Controller, &[Value]) -> Value + Send + Sync + 'static,
    {
        self.methods.insert(name.into(), Arc::new(f));
        self
    }

    pub fn hook<F>(mut self, kind: HookKind, f: F) -> Self
    where
        F: Fn(&Controller) + Send + Sync + 'static,
    {
        self.hooks.insert(kind, Arc::new(f));
        self
    }

    pub fn native_render(mut self, native: bool) -> Self {
        self.native_render = native;
        self
    }
}

impl fmt::Debug for ComponentOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentOptions")
            .field("name", &self.name)
            .field("data", &self.data)
            .field("computed", &self.computed.keys().collect::<Vec<_>>())
            .field("watch", &self.watch)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("native_render", &self.native_render)
            .finish()
    }
}
