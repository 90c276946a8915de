//! Integration Tests for the Component Controller
//!
//! These tests drive controllers end to end: data writes, scheduler flushes,
//! the patches that reach the render sink and the lifecycle hooks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use prism_core::component::InjectedRender;
use prism_core::{
    Completion, ComponentOptions, ComputedDef, Controller, ControllerError, HookKind,
    HostBindings, LifecycleState, Patch, PathError, RenderError, RuntimeConfig, TaskQueue,
    WatchHandler, WatchOptions,
};
use serde_json::{json, Map, Value};

/// A controller wired to a recording render sink.
struct Harness {
    controller: Controller,
    queue: Arc<TaskQueue>,
    patches: Arc<Mutex<Vec<Patch>>>,
    /// Completions held back when the sink is not auto-completing.
    held: Arc<Mutex<Vec<Completion>>>,
}

impl Harness {
    fn new(options: ComponentOptions, initial: Value, config: RuntimeConfig) -> Self {
        Self::build(options, initial, config, true, None)
    }

    fn build(
        options: ComponentOptions,
        initial: Value,
        config: RuntimeConfig,
        auto_complete: bool,
        injected: Option<InjectedRender>,
    ) -> Self {
        let queue = Arc::new(TaskQueue::new());
        let patches: Arc<Mutex<Vec<Patch>>> = Arc::default();
        let held: Arc<Mutex<Vec<Completion>>> = Arc::default();

        let initial = object(initial);
        let sink_patches = patches.clone();
        let sink_held = held.clone();
        let mut host = HostBindings::new()
            .with_initial_data(move || initial.clone())
            .with_render(move |patch, completion| {
                sink_patches.lock().push(patch);
                if let Some(completion) = completion {
                    if auto_complete {
                        completion.complete();
                    } else {
                        sink_held.lock().push(completion);
                    }
                }
            });
        if let Some(injected) = injected {
            host = host.with_injected_render(move |c| injected(c));
        }

        let controller = Controller::new(options, host, queue.clone(), config);
        Self {
            controller,
            queue,
            patches,
            held,
        }
    }

    fn sink_calls(&self) -> usize {
        self.patches.lock().len()
    }

    fn last_patch(&self) -> Patch {
        self.patches.lock().last().cloned().unwrap_or_default()
    }

    fn complete_held(&self) {
        let held = std::mem::take(&mut *self.held.lock());
        for completion in held {
            completion.complete();
        }
    }
}

fn injected<F>(f: F) -> InjectedRender
where
    F: Fn(&Controller) -> Result<Patch, RenderError> + Send + Sync + 'static,
{
    Arc::new(f)
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn patch(value: Value) -> Patch {
    object(value).into_iter().collect()
}

fn counter() -> (Arc<AtomicUsize>, impl Fn(&Controller) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let hook_count = count.clone();
    (count, move |_: &Controller| {
        hook_count.fetch_add(1, Ordering::SeqCst);
    })
}

/// Loose diff sends exactly the top-level keys that changed.
#[test]
fn loose_render_sends_changed_keys_only() {
    let options = ComponentOptions::new("card").data(json!({ "a": 1, "b": { "x": 1 }, "c": "keep" }));
    let h = Harness::new(options, json!({ "prop": 1 }), RuntimeConfig::default());
    h.controller.created().unwrap();

    let first = h.last_patch();
    assert_eq!(first.get("a"), Some(&json!(1)));
    assert!(!first.contains_key("prop"));

    h.controller.set("b.x", json!(2)).unwrap();
    h.controller.set("a", json!(1)).unwrap();
    h.queue.flush();

    assert_eq!(h.sink_calls(), 2);
    assert_eq!(h.last_patch(), patch(json!({ "b": { "x": 2 } })));
}

/// Rendering twice without a write does not reach the sink the second time.
#[test]
fn idempotent_render_skips_sink() {
    let options = ComponentOptions::new("card").data(json!({ "a": 1 }));
    let h = Harness::new(options, json!({}), RuntimeConfig::default());
    h.controller.created().unwrap();
    assert_eq!(h.sink_calls(), 1);

    h.controller.render().unwrap();
    h.controller.render().unwrap();
    assert_eq!(h.sink_calls(), 1);
}

/// The strict-diff walkthrough: sub-path emission, then an ancestor write
/// superseding the tracked sub-path.
#[test]
fn strict_diff_supersedes_tracked_sub_path() {
    // 0 renders `a` and `b.x`; 1 renders `a` and the whole `b`.
    let shape = Arc::new(AtomicUsize::new(0));
    let render_shape = shape.clone();
    let render = injected(move |c| {
        let mut out = Patch::new();
        out.insert("a".into(), c.get("a").unwrap_or(Value::Null));
        if render_shape.load(Ordering::SeqCst) == 0 {
            out.insert("b.x".into(), c.get("b.x").unwrap_or(Value::Null));
        } else {
            out.insert("b".into(), c.get_deep("b").unwrap_or(Value::Null));
        }
        Ok(out)
    });

    let data = json!({ "a": 1, "b": { "x": 1 } });
    let h = Harness::build(
        ComponentOptions::new("strict").data(data.clone()),
        data,
        RuntimeConfig::strict(),
        true,
        Some(render),
    );
    h.controller.created().unwrap();
    assert_eq!(h.sink_calls(), 0, "first render matches initial data");

    h.controller.set("b.x", json!(2)).unwrap();
    h.queue.flush();
    assert_eq!(h.last_patch(), patch(json!({ "b.x": 2 })));
    let snapshot = h.controller.snapshot().unwrap();
    assert_eq!(snapshot.get("b.x"), Some(&json!(2)));
    assert!(snapshot.get("b").is_none());

    shape.store(1, Ordering::SeqCst);
    h.controller.set("b", json!({ "x": 3, "y": 1 })).unwrap();
    h.queue.flush();
    assert_eq!(h.last_patch(), patch(json!({ "b": { "x": 3, "y": 1 } })));

    let snapshot = h.controller.snapshot().unwrap();
    assert!(snapshot.get("b.x").is_none());
    assert!(!snapshot.has_overlapping_keys());
}

/// Forced updates reach the sink even when the store saw no change, and
/// the overlay is cleared once merged.
#[test]
fn force_update_is_always_rendered() {
    let options = ComponentOptions::new("form").data(json!({ "value": "same" }));
    let h = Harness::new(options, json!({}), RuntimeConfig::default());
    h.controller.created().unwrap();
    h.controller.mounted();
    let before = h.sink_calls();

    let mut data = Map::new();
    data.insert("value".into(), json!("same"));
    h.controller.force_update(Some(data), None).unwrap();
    assert_eq!(h.controller.pending_force_update().len(), 1);

    h.queue.flush();
    assert_eq!(h.sink_calls(), before + 1);
    assert_eq!(h.last_patch(), patch(json!({ "value": "same" })));
    assert!(h.controller.pending_force_update().is_empty());

    h.controller.render().unwrap();
    assert_eq!(h.sink_calls(), before + 1);
}

/// `set_data` writes through to the store and its callback runs after the
/// patch is painted.
#[test]
fn set_data_callback_runs_after_paint() {
    let options = ComponentOptions::new("form").data(json!({ "n": 0 }));
    let h = Harness::build(options, json!({}), RuntimeConfig::default(), false, None);
    h.controller.created().unwrap();
    h.controller.mounted();

    let done = Arc::new(AtomicUsize::new(0));
    let flag = done.clone();
    let mut data = Map::new();
    data.insert("n".into(), json!(4));
    h.controller
        .set_data(
            data,
            Some(Completion::new(move || {
                flag.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();

    assert_eq!(h.controller.get("n"), Some(json!(4)));
    h.queue.flush();
    assert_eq!(h.last_patch(), patch(json!({ "n": 4 })));
    assert_eq!(done.load(Ordering::SeqCst), 0);

    h.complete_held();
    assert_eq!(done.load(Ordering::SeqCst), 1);
}

/// A forced update that only names keys the component does not own is an
/// empty render: no sink call, no `updated`, no new render task.
#[test]
fn force_update_of_foreign_keys_renders_nothing() {
    let (updated, hook) = counter();
    let options = ComponentOptions::new("form")
        .data(json!({ "value": 1 }))
        .hook(HookKind::Updated, hook);
    let h = Harness::new(options, json!({}), RuntimeConfig::default());
    h.controller.created().unwrap();
    h.controller.mounted();
    h.queue.flush();
    let before = h.sink_calls();
    let task = h.controller.render_task().unwrap();

    h.controller
        .force_update(Some(object(json!({ "prop": 9 }))), None)
        .unwrap();
    h.queue.flush();

    assert_eq!(h.sink_calls(), before);
    assert_eq!(updated.load(Ordering::SeqCst), 0);
    assert!(h.controller.render_task().unwrap().ptr_eq(&task));
    assert!(h.controller.pending_force_update().is_empty());
}

/// Writing an array index past the end is an error, not a panic, and leaves
/// the data as it was.
#[test]
fn out_of_range_index_write_is_an_error() {
    let options = ComponentOptions::new("list").data(json!({ "list": [1] }));
    let h = Harness::new(options, json!({}), RuntimeConfig::default());
    h.controller.created().unwrap();
    h.controller.mounted();
    let before = h.sink_calls();

    let err = h.controller.set("list[18446744073709551615]", json!(1));
    assert!(matches!(
        err,
        Err(ControllerError::Path(PathError::IndexOutOfRange { len: 1, .. }))
    ));
    let err = h
        .controller
        .force_update(Some(object(json!({ "list[50]": 1 }))), None);
    assert!(matches!(err, Err(ControllerError::Path(_))));

    h.queue.flush();
    assert_eq!(h.controller.get("list"), Some(json!([1])));
    assert_eq!(h.sink_calls(), before);

    h.controller.set("list[1]", json!(2)).unwrap();
    h.queue.flush();
    assert_eq!(h.last_patch(), patch(json!({ "list": [1, 2] })));
}

/// `mounted` fires once however often the host reports it.
#[test]
fn mounted_hook_fires_once() {
    let (mounted, hook) = counter();
    let options = ComponentOptions::new("m").hook(HookKind::Mounted, hook);
    let h = Harness::new(options, json!({}), RuntimeConfig::default());
    h.controller.created().unwrap();

    h.controller.mounted();
    h.controller.mounted();
    assert_eq!(mounted.load(Ordering::SeqCst), 1);
    assert_eq!(h.controller.state(), LifecycleState::Mounted);
}

/// `updated` never fires before mount, and collapses per flush after it.
#[test]
fn updated_hook_waits_for_mount() {
    let (updated, hook) = counter();
    let options = ComponentOptions::new("u")
        .data(json!({ "n": 0 }))
        .hook(HookKind::Updated, hook);
    let h = Harness::new(options, json!({}), RuntimeConfig::default());
    h.controller.created().unwrap();

    h.controller.set("n", json!(1)).unwrap();
    h.queue.flush();
    h.controller.updated();
    h.queue.flush();
    assert_eq!(updated.load(Ordering::SeqCst), 0);

    h.controller.mounted();
    h.controller.set("n", json!(2)).unwrap();
    h.controller.updated();
    h.controller.updated();
    h.queue.flush();
    assert_eq!(updated.load(Ordering::SeqCst), 1);
}

/// A queued `updated` hook re-checks the state and stays silent once the
/// controller is destroyed.
#[test]
fn updated_hook_skipped_after_destroy() {
    let (updated, hook) = counter();
    let options = ComponentOptions::new("u")
        .data(json!({ "n": 0 }))
        .hook(HookKind::Updated, hook);
    let h = Harness::new(options, json!({}), RuntimeConfig::default());
    h.controller.created().unwrap();
    h.controller.mounted();
    h.queue.flush();

    h.controller.updated();
    h.controller.destroyed();
    h.queue.flush();
    assert_eq!(updated.load(Ordering::SeqCst), 0);
    assert_eq!(h.controller.state(), LifecycleState::Destroyed);
}

/// Destroying a controller drops every subscription; later writes neither
/// render nor fire hooks.
#[test]
fn destroy_leaves_no_subscriptions() {
    let (destroyed, hook) = counter();
    let (watched, watch_hook) = counter();
    let options = ComponentOptions::new("d")
        .data(json!({ "n": 0, "first": "a" }))
        .computed("upper", ComputedDef::new(|c| json!(c.get("first"))))
        .watch(
            "n",
            WatchHandler::function(move |c, _, _| watch_hook(c)),
        )
        .hook(HookKind::Destroyed, hook);
    let h = Harness::new(options, json!({}), RuntimeConfig::default());
    h.controller.created().unwrap();
    h.controller.mounted();
    assert!(h.controller.live_subscriptions() > 0);
    let calls = h.sink_calls();

    h.controller.destroyed();
    h.controller.destroyed();
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(h.controller.live_subscriptions(), 0);
    assert_eq!(h.controller.watcher_count(), 0);

    let mut data = Map::new();
    data.insert("n".into(), json!(9));
    assert!(matches!(
        h.controller.force_update(Some(data), None),
        Err(ControllerError::Destroyed(_))
    ));
    assert!(matches!(
        h.controller.set("n", json!(9)),
        Err(ControllerError::Destroyed(_))
    ));
    h.queue.flush();

    assert_eq!(h.sink_calls(), calls);
    assert_eq!(watched.load(Ordering::SeqCst), 0);
    assert_eq!(h.controller.computed("upper"), Some(json!("a")));
}

/// Several writes to a computed's inputs cost one re-evaluation.
#[test]
fn computed_reevaluates_once_per_read() {
    let evaluations = Arc::new(AtomicUsize::new(0));
    let count = evaluations.clone();
    let options = ComponentOptions::new("name")
        .data(json!({ "first": "Ada", "last": "Byron" }))
        .computed(
            "full",
            ComputedDef::new(move |c| {
                count.fetch_add(1, Ordering::SeqCst);
                let first = c.get("first").unwrap_or(Value::Null);
                let last = c.get("last").unwrap_or(Value::Null);
                json!(format!(
                    "{} {}",
                    first.as_str().unwrap_or_default(),
                    last.as_str().unwrap_or_default()
                ))
            }),
        );
    let h = Harness::new(options, json!({}), RuntimeConfig::default());
    h.controller.created().unwrap();
    let base = evaluations.load(Ordering::SeqCst);

    h.controller.set("last", json!("King")).unwrap();
    h.controller.set("last", json!("Lovelace")).unwrap();
    h.controller.set("first", json!("Augusta")).unwrap();
    assert_eq!(evaluations.load(Ordering::SeqCst), base);

    assert_eq!(h.controller.computed("full"), Some(json!("Augusta Lovelace")));
    assert_eq!(h.controller.computed("full"), Some(json!("Augusta Lovelace")));
    assert_eq!(evaluations.load(Ordering::SeqCst), base + 1);

    h.queue.flush();
    assert_eq!(evaluations.load(Ordering::SeqCst), base + 1);
    assert_eq!(h.last_patch().get("full"), Some(&json!("Augusta Lovelace")));
}

/// `next_tick` callbacks wait for the render that is in flight.
#[test]
fn next_tick_waits_for_paint() {
    let options = ComponentOptions::new("t").data(json!({ "n": 0 }));
    let h = Harness::build(options, json!({}), RuntimeConfig::default(), false, None);
    h.controller.created().unwrap();
    h.controller.mounted();

    let ticked = Arc::new(AtomicUsize::new(0));
    let flag = ticked.clone();
    h.controller.set("n", json!(1)).unwrap();
    h.controller.next_tick(move || {
        flag.fetch_add(1, Ordering::SeqCst);
    });
    h.queue.flush();

    assert_eq!(h.last_patch(), patch(json!({ "n": 1 })));
    assert_eq!(ticked.load(Ordering::SeqCst), 0);
    assert!(!h.controller.render_task().unwrap().is_resolved());

    h.complete_held();
    assert_eq!(ticked.load(Ordering::SeqCst), 1);
    assert!(h.controller.render_task().unwrap().is_resolved());
}

/// The first render's token resolves on mount and can be awaited.
#[tokio::test]
async fn first_render_task_resolves_on_mount() {
    let h = Harness::new(
        ComponentOptions::new("t").data(json!({ "n": 0 })),
        json!({}),
        RuntimeConfig::default(),
    );
    h.controller.created().unwrap();
    let task = h.controller.render_task().unwrap();
    assert!(!task.is_resolved());

    h.controller.mounted();
    task.finished().await;
    assert!(task.is_resolved());
}

/// A failing render function degrades to rendering all data.
#[test]
fn injected_render_failure_falls_back() {
    let render = injected(|_| Err(RenderError::new("template exploded")));
    let h = Harness::build(
        ComponentOptions::new("fallback").data(json!({ "a": 1 })),
        json!({}),
        RuntimeConfig::from_json(r#"{ "ignoreRenderError": true }"#).unwrap(),
        true,
        Some(render),
    );
    h.controller.created().unwrap();

    assert_eq!(h.sink_calls(), 1);
    assert_eq!(h.last_patch().get("a"), Some(&json!(1)));
}

/// Missing host bindings are configuration errors.
#[test]
fn missing_host_bindings_fail_creation() {
    let queue = Arc::new(TaskQueue::new());
    let controller = Controller::new(
        ComponentOptions::new("bare"),
        HostBindings::new(),
        queue.clone(),
        RuntimeConfig::default(),
    );
    assert!(matches!(
        controller.created(),
        Err(ControllerError::MissingInitialData(name)) if name == "bare"
    ));

    let controller = Controller::new(
        ComponentOptions::new("bare"),
        HostBindings::new().with_initial_data(Map::new),
        queue,
        RuntimeConfig::default(),
    );
    assert!(matches!(
        controller.created(),
        Err(ControllerError::MissingRenderSink(_))
    ));
}

/// Immediate watches see the current value at registration.
#[test]
fn immediate_watch_runs_at_registration() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let options = ComponentOptions::new("w")
        .data(json!({ "n": 3 }))
        .watch(
            "n",
            WatchHandler::function(move |_, new, old| log.lock().push((new.clone(), old.clone())))
                .with_options(WatchOptions {
                    immediate: true,
                    ..WatchOptions::default()
                }),
        );
    let h = Harness::new(options, json!({}), RuntimeConfig::default());
    h.controller.created().unwrap();
    assert_eq!(*seen.lock(), vec![(json!(3), Value::Null)]);

    h.controller.set("n", json!(4)).unwrap();
    h.queue.flush();
    assert_eq!(seen.lock().last(), Some(&(json!(4), json!(3))));
}

/// Watching a computed reacts to changes in its inputs.
#[test]
fn watch_on_computed_key() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let options = ComponentOptions::new("w")
        .data(json!({ "n": 1 }))
        .computed(
            "double",
            ComputedDef::new(|c| json!(c.get("n").and_then(|v| v.as_i64()).unwrap_or(0) * 2)),
        )
        .watch(
            "double",
            WatchHandler::function(move |_, new, _| log.lock().push(new.clone())),
        );
    let h = Harness::new(options, json!({}), RuntimeConfig::default());
    h.controller.created().unwrap();

    h.controller.set("n", json!(5)).unwrap();
    h.queue.flush();
    assert_eq!(*seen.lock(), vec![json!(10)]);
}
