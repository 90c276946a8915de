//! Host bindings: the functions a backend supplies to a controller.
//!
//! The render sink and initial-data supplier are required. A controller that
//! reaches the point of needing one and finds it missing fails with a
//! configuration error.

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::Controller;
use crate::diff::Patch;
use crate::error::RenderError;

/// Supplies the data the backend already holds before the controller starts
/// (props, template defaults).
pub type InitialDataFn = Arc<dyn Fn() -> Map<String, Value> + Send + Sync>;

/// Applies a patch and calls the completion once it is visible.
pub type RenderSink = Arc<dyn Fn(Patch, Option<Completion>) + Send + Sync>;

/// Compiled render function producing raw render data keyed by path.
pub type InjectedRender = Arc<dyn Fn(&Controller) -> Result<Patch, RenderError> + Send + Sync>;

/// Completion callback handed to the render sink.
pub struct Completion(Box<dyn FnOnce() + Send>);

impl Completion {
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self(Box::new(f))
    }

    /// Signal that the patch has been applied.
    pub fn complete(self) {
        (self.0)();
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Completion")
    }
}

/// The backend side of a controller.
#[derive(Clone, Default)]
pub struct HostBindings {
    pub initial_data: Option<InitialDataFn>,
    pub render: Option<RenderSink>,
    pub injected_render: Option<InjectedRender>,
}

impl HostBindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_initial_data<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Map<String, Value> + Send + Sync + 'static,
    {
        self.initial_data = Some(Arc::new(f));
        self
    }

    pub fn with_render<F>(mut self, f: F) -> Self
    where
        F: Fn(Patch, Option<Completion>) + Send + Sync + 'static,
    {
        self.render = Some(Arc::new(f));
        self
    }

    pub fn with_injected_render<F>(mut self, f: F) -> Self
    where
        F: Fn(&Controller) -> Result<Patch, RenderError> + Send + Sync + 'static,
    {
        self.injected_render = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for HostBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostBindings")
            .field("initial_data", &self.initial_data.is_some())
            .field("render", &self.render.is_some())
            .field("injected_render", &self.injected_render.is_some())
            .finish()
    }
}
