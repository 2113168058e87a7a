//! DOM Sync Controller - one live widget instance
//!
//! A [`View`] owns a container node in the document and keeps it in sync with
//! the model through four loops:
//! 1. Model → DOM: a change to a path the template mentions re-renders the
//!    whole widget; a change to a children source remounts only that slot.
//! 2. DOM → model: every attribute-bound node has a mutation observer that
//!    runs the token patterns and writes one batch under the guard.
//! 3. Events: bound DOM events are serialized and forwarded to the model,
//!    optionally followed by an extraction pass on the same node.
//! 4. Scripts: lifecycle scripts at their lifecycle point, field scripts on
//!    changes of their field.
//!
//! Model notifications never run inline: each one is queued on the host loop
//! together with whether the guard was held when it fired. A notification
//! already covered by a queued change of the same kind (an ancestor path, or
//! the same path) is not queued again, so replacing a sub-node is handled
//! once. Self-caused changes (the engine's own writes) are dropped when they
//! are handled.
//!
//! ```text
//! initialize ──► walk `data` ──► render ──► bind ──► `render` script
//!                    │                        ▲
//!        change ─► defer ─► handle_change ────┘ (template path / looped slot)
//!                                  ├─► remount_slot (children source)
//!                                  └─► field scripts
//! ```

use std::cell::{Ref, RefCell};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use super::guard::ReentrancyGuard;
use super::host::HostLoop;
use crate::binding::{BindingRegistry, ChildrenBinding, EventBinding};
use crate::config::EngineConfig;
use crate::dom::{
    parse_fragment, Document, DomEvent, EventSerializer, ListenerId, NodeId, ObserverId,
    PlainSerializer,
};
use crate::error::{Result, TesseraError};
use crate::event::{EngineEvent, EventLog, RenderCause, WriteSource};
use crate::model::walker::WalkCallback;
use crate::model::{DataModel, OutboundEvent, SubscriptionSet};
use crate::script::{ScriptHost, ScriptScope};
use crate::template::{self, node_id, vdom, CompiledTemplate, Handler, HandlerAction, MountedHandler, RenderScope};
use crate::util::constants::{
    DATA_ROOT, DEV_ERROR_CLASS, SCRIPT_AFTER_LAYOUT, SCRIPT_REMOVE, SCRIPT_RENDER,
};
use crate::util::jsonpath;
use crate::widget::{ChildrenSource, WidgetDefinition};

// ═══════════════════════════════════════════
// CHILD VIEWS
// ═══════════════════════════════════════════

/// A mounted child component
pub trait ChildView {
    /// Top-level node; re-parented on every remount, never rebuilt
    fn root(&self) -> NodeId;

    /// The child left every slot for good
    fn unmount(&self) {}
}

/// Builds child views for child models
pub trait ChildViewBuilder {
    /// `None` skips the entry
    fn build(&self, child: &Value, document: &Document) -> Option<Rc<dyn ChildView>>;
}

/// A child model, as offered to a [`ChildViewBuilder`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChildModel {
    /// Node name of the children slot
    pub slot: Arc<str>,
    pub index: usize,
    /// Absolute model path of the entry
    pub path: String,
    pub value: Value,
}

struct MountedChild {
    roots: Vec<NodeId>,
    view: Option<Rc<dyn ChildView>>,
}

/// (slot, entry key)
type ChildKey = (Arc<str>, String);

/// Model changes waiting on the host loop: (relative path, self-caused)
type PendingChanges = Rc<RefCell<Vec<(String, bool)>>>;

// ═══════════════════════════════════════════
// LIVE BINDINGS
// ═══════════════════════════════════════════

/// Observers and listeners materialized by the last render
///
/// Replaced as a whole on every rebuild; torn down before the document
/// changes, never after.
#[derive(Debug, Default)]
pub struct LiveBindings {
    observers: Vec<ObserverId>,
    listeners: Vec<ListenerId>,
}

impl LiveBindings {
    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Drop pending records without delivering them
    fn discard_records(&self, document: &Document) {
        for id in &self.observers {
            document.take_records(*id);
        }
    }

    fn teardown(&mut self, document: &Document) {
        for id in self.observers.drain(..) {
            let dropped = document.take_records(id);
            if !dropped.is_empty() {
                debug!(records = dropped.len(), "Undelivered mutation records dropped");
            }
            document.disconnect(id);
        }
        for id in self.listeners.drain(..) {
            document.remove_event_listener(id);
        }
    }
}

// ═══════════════════════════════════════════
// VIEW
// ═══════════════════════════════════════════

struct ViewInner {
    id: Arc<str>,
    definition: WidgetDefinition,
    template: Arc<CompiledTemplate>,
    registry: BindingRegistry,
    scripts: Rc<ScriptHost>,
    model: Rc<dyn DataModel>,
    document: Document,
    container: NodeId,
    config: EngineConfig,
    guard: ReentrancyGuard,
    state: Rc<RefCell<Map<String, Value>>>,
    log: EventLog,
    serializer: Rc<dyn EventSerializer>,
    child_builder: Option<Rc<dyn ChildViewBuilder>>,
    children: FxHashMap<ChildKey, MountedChild>,
    live: LiveBindings,
    subscriptions: Option<SubscriptionSet>,
    pending: PendingChanges,
    /// Instance count per looped node at the last render
    loop_lens: FxHashMap<String, usize>,
    renders: usize,
    removed: bool,
}

/// Handle to a live widget instance; clones share the same view
#[derive(Clone)]
pub struct View {
    inner: Rc<RefCell<ViewInner>>,
}

type Compiled = (Arc<CompiledTemplate>, BindingRegistry, Rc<ScriptHost>);

fn compile_parts(definition: &WidgetDefinition, config: &EngineConfig) -> Result<Compiled> {
    let template = template::compile(&definition.template, &definition.methods)?;
    let registry = BindingRegistry::build(definition, &template)?;
    let scripts = ScriptHost::build(
        registry
            .scripts()
            .iter()
            .map(|s| (&*s.name, s.source.as_str())),
        template.node_names(),
        config.max_script_depth,
    )?;
    Ok((template, registry, Rc::new(scripts)))
}

impl View {
    /// Compile `definition` and attach it to `container`
    ///
    /// Nothing is rendered until [`View::initialize`]. A compile failure is
    /// returned; in development mode it is also shown inside the container.
    pub fn new(
        definition: WidgetDefinition,
        model: Rc<dyn DataModel>,
        document: Document,
        container: NodeId,
        view_id: &str,
        config: EngineConfig,
    ) -> Result<Self> {
        let log = EventLog::new();
        let (template, registry, scripts) = match compile_parts(&definition, &config) {
            Ok(parts) => parts,
            Err(e) => {
                report_failure(&document, container, &log, config.dev_mode, &e);
                return Err(e);
            }
        };
        debug!(
            view = %view_id,
            nodes = template.node_names().len(),
            scripts = scripts.len(),
            "View compiled"
        );

        Ok(Self {
            inner: Rc::new(RefCell::new(ViewInner {
                id: view_id.into(),
                definition,
                template,
                registry,
                scripts,
                model,
                document,
                container,
                config,
                guard: ReentrancyGuard::new(),
                state: Rc::new(RefCell::new(Map::new())),
                log,
                serializer: Rc::new(PlainSerializer),
                child_builder: None,
                children: FxHashMap::default(),
                live: LiveBindings::default(),
                subscriptions: None,
                pending: PendingChanges::default(),
                loop_lens: FxHashMap::default(),
                renders: 0,
                removed: false,
            })),
        })
    }

    pub fn with_serializer(self, serializer: impl EventSerializer + 'static) -> Self {
        self.inner.borrow_mut().serializer = Rc::new(serializer);
        self
    }

    pub fn with_child_builder(self, builder: impl ChildViewBuilder + 'static) -> Self {
        self.inner.borrow_mut().child_builder = Some(Rc::new(builder));
        self
    }

    fn upgrade(weak: &Weak<RefCell<ViewInner>>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    /// Borrow the state, failing once the view is removed
    fn live(&self) -> Result<Ref<'_, ViewInner>> {
        let inner = self.inner.borrow();
        if inner.removed {
            return Err(TesseraError::ViewRemoved {
                id: inner.id.to_string(),
            });
        }
        Ok(inner)
    }

    // ═══════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════

    pub fn id(&self) -> Arc<str> {
        Arc::clone(&self.inner.borrow().id)
    }

    pub fn container(&self) -> NodeId {
        self.inner.borrow().container
    }

    pub fn document(&self) -> Document {
        self.inner.borrow().document.clone()
    }

    /// Activity log (shared handle)
    pub fn events(&self) -> EventLog {
        self.inner.borrow().log.clone()
    }

    /// Copy of the per-view script state
    pub fn state(&self) -> Map<String, Value> {
        self.inner.borrow().state.borrow().clone()
    }

    pub fn definition(&self) -> WidgetDefinition {
        self.inner.borrow().definition.clone()
    }

    pub fn render_count(&self) -> usize {
        self.inner.borrow().renders
    }

    /// (observers, listeners) currently materialized
    pub fn live_bindings(&self) -> (usize, usize) {
        let inner = self.inner.borrow();
        (inner.live.observer_count(), inner.live.listener_count())
    }

    pub fn subscription_count(&self) -> usize {
        self.inner
            .borrow()
            .subscriptions
            .as_ref()
            .map_or(0, SubscriptionSet::len)
    }

    pub fn is_removed(&self) -> bool {
        self.inner.borrow().removed
    }

    /// Container contents as HTML
    pub fn html(&self) -> String {
        let inner = self.inner.borrow();
        inner.document.inner_html(inner.container)
    }

    // ═══════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════

    /// Subscribe to every field under `data`, then render
    pub fn initialize(&self) -> Result<()> {
        let (model, host, guard, pending, id, log) = {
            let inner = self.live()?;
            (
                Rc::clone(&inner.model),
                inner.document.host().clone(),
                inner.guard.clone(),
                Rc::clone(&inner.pending),
                Arc::clone(&inner.id),
                inner.log.clone(),
            )
        };

        let weak = Rc::downgrade(&self.inner);
        let on_change: WalkCallback = Rc::new(move |path: &str, _value: &Value| {
            let self_caused = guard.is_held();
            if !queue_change(&pending, path, self_caused) {
                return;
            }
            let weak = weak.clone();
            let path = path.to_string();
            host.defer(move || {
                if let Some(view) = View::upgrade(&weak) {
                    view.handle_change(&path, self_caused);
                }
            });
        });
        let subscriptions = SubscriptionSet::walk(model, DATA_ROOT, on_change);
        let count = subscriptions.len();
        let previous = self.inner.borrow_mut().subscriptions.replace(subscriptions);
        drop(previous);

        debug!(view = %id, subscriptions = count, "View initialized");
        log.emit(EngineEvent::Initialized {
            view_id: id,
            subscriptions: count,
        });
        self.render_with(RenderCause::Initial)
    }

    /// Full render now
    pub fn render(&self) -> Result<()> {
        let cause = if self.render_count() == 0 {
            RenderCause::Initial
        } else {
            RenderCause::Deferred
        };
        self.render_with(cause)
    }

    /// Queue a full render for a later host-loop turn
    pub fn invalidate_render(&self) {
        let host = self.inner.borrow().document.host().clone();
        schedule_render(&host, &Rc::downgrade(&self.inner));
    }

    pub fn after_layout(&self) -> Result<()> {
        self.live()?;
        self.run_lifecycle(SCRIPT_AFTER_LAYOUT);
        Ok(())
    }

    /// Run the `remove` script, then release everything the view holds
    ///
    /// Afterwards every entry point fails with `ViewRemoved`.
    pub fn remove(&self) -> Result<()> {
        self.live()?;
        self.run_lifecycle(SCRIPT_REMOVE);

        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        inner.live.teardown(&inner.document);
        let subscriptions = inner.subscriptions.take();
        inner.pending.borrow_mut().clear();
        for (_, child) in inner.children.drain() {
            for root in child.roots {
                inner.document.remove(root);
            }
            if let Some(view) = child.view {
                view.unmount();
            }
        }
        inner.document.clear_children(inner.container);
        inner.removed = true;
        debug!(view = %inner.id, "View removed");
        inner.log.emit(EngineEvent::Removed {
            view_id: Arc::clone(&inner.id),
        });
        drop(guard);
        drop(subscriptions);
        Ok(())
    }

    /// Swap in a new definition and re-render
    ///
    /// On a compile failure the previous definition stays active (in
    /// development mode the error replaces the widget contents).
    pub fn replace_definition(&self, definition: WidgetDefinition) -> Result<()> {
        let config = self.live()?.config.clone();
        match compile_parts(&definition, &config) {
            Ok((template, registry, scripts)) => {
                {
                    let mut inner = self.inner.borrow_mut();
                    inner.definition = definition;
                    inner.template = template;
                    inner.registry = registry;
                    inner.scripts = scripts;
                }
                self.render_with(RenderCause::Definition)
            }
            Err(e) => {
                let mut guard = self.inner.borrow_mut();
                let inner = &mut *guard;
                if config.dev_mode {
                    inner.live.teardown(&inner.document);
                    inner.detach_children(None);
                }
                report_failure(&inner.document, inner.container, &inner.log, config.dev_mode, &e);
                Err(e)
            }
        }
    }

    /// Every child model behind a field-sourced children slot
    pub fn child_models(&self) -> Result<Vec<ChildModel>> {
        let inner = self.live()?;
        let mut out = Vec::new();
        for slot in inner.registry.children() {
            let Some(field) = slot.source.field() else { continue };
            let path = jsonpath::join(DATA_ROOT, field);
            match inner.model.get(&path) {
                Some(Value::Array(items)) => {
                    out.extend(items.into_iter().enumerate().map(|(index, value)| ChildModel {
                        slot: Arc::clone(&slot.node),
                        index,
                        path: jsonpath::join(&path, &index.to_string()),
                        value,
                    }));
                }
                Some(Value::Null) | None => {}
                Some(value) => out.push(ChildModel {
                    slot: Arc::clone(&slot.node),
                    index: 0,
                    path,
                    value,
                }),
            }
        }
        Ok(out)
    }

    // ═══════════════════════════════════════════
    // MODEL → DOM
    // ═══════════════════════════════════════════

    fn handle_change(&self, path: &str, self_caused: bool) {
        let (slot, rerender, scripts) = {
            let inner = self.inner.borrow();
            if inner.removed || !take_queued(&inner.pending, path, self_caused) {
                return;
            }
            if self_caused {
                debug!(view = %inner.id, path = %path, "Self-caused change ignored");
                return;
            }
            let slot = inner
                .registry
                .children_for_field(path)
                .map(|c| (Arc::clone(&c.node), c.looped));
            let scripts: Vec<Arc<str>> = inner
                .registry
                .scripts_for_field(path)
                .map(|s| Arc::clone(&s.name))
                .collect();
            (slot, inner.template.references(path), scripts)
        };

        let result = match slot {
            // Instance ids depend on the array; regenerate them all
            Some((_, true)) => self.render_with(RenderCause::Changed(path.to_string())),
            Some((node, false)) => self.remount_slot(&node),
            None if rerender => self.render_with(RenderCause::Changed(path.to_string())),
            None => Ok(()),
        };
        if let Err(e) = result {
            warn!(path = %path, error = %e, "Update after model change failed");
        }

        for name in scripts {
            self.run_logged(&name);
        }
    }

    fn render_with(&self, cause: RenderCause) -> Result<()> {
        let handlers = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;
            if inner.removed {
                return Err(TesseraError::ViewRemoved {
                    id: inner.id.to_string(),
                });
            }
            inner.live.teardown(&inner.document);

            let root = inner.model.get("").unwrap_or(Value::Null);
            let loops = loop_arrays(&inner.registry, &root);
            let vnodes = inner.template.render(&RenderScope {
                model: &root,
                view_id: &inner.id,
                loops: &loops,
            });

            let token = inner.guard.hold();
            inner.detach_children(None);
            inner.document.clear_children(inner.container);
            let handlers = vdom::materialize(&inner.document, inner.container, &vnodes);
            inner.loop_lens = loops.iter().map(|(k, v)| (k.clone(), v.len())).collect();

            let slots: Vec<ChildrenBinding> = inner.registry.children().cloned().collect();
            let mut used = FxHashSet::default();
            for slot in &slots {
                inner.mount_slot(slot, &root, &mut used);
            }
            inner.prune_children(None, &used);
            drop(token);

            inner.renders += 1;
            debug!(view = %inner.id, cause = ?cause, "View rendered");
            inner.log.emit(EngineEvent::Rendered {
                view_id: Arc::clone(&inner.id),
                cause,
            });
            handlers
        };

        self.bind(handlers);
        self.run_lifecycle(SCRIPT_RENDER);
        Ok(())
    }

    fn remount_slot(&self, node: &Arc<str>) -> Result<()> {
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let Some(slot) = inner.registry.children_for(node).cloned() else {
            return Ok(());
        };
        let root = inner.model.get("").unwrap_or(Value::Null);

        let token = inner.guard.hold();
        inner.detach_children(Some(&slot.node));
        let mut used = FxHashSet::default();
        inner.mount_slot(&slot, &root, &mut used);
        inner.prune_children(Some(&slot.node), &used);
        inner.live.discard_records(&inner.document);
        drop(token);
        Ok(())
    }

    // ═══════════════════════════════════════════
    // LIVE BINDINGS
    // ═══════════════════════════════════════════

    fn bind(&self, handlers: Vec<MountedHandler>) {
        let weak = Rc::downgrade(&self.inner);
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;
        let mut live = LiveBindings::default();

        let attr_nodes: Vec<Arc<str>> = inner.registry.attrs().map(|(n, _)| Arc::clone(n)).collect();
        for name in attr_nodes {
            for (index, node) in inner.locate(&name, "attribute extraction") {
                let weak = weak.clone();
                let name = Arc::clone(&name);
                live.observers.push(inner.document.observe(node, move |records| {
                    if let Some(view) = View::upgrade(&weak) {
                        debug!(node = %name, records = records.len(), "Mutations observed");
                        view.extract(&name, index, node);
                    }
                }));
            }
        }

        let event_bindings: Vec<(Arc<str>, EventBinding)> = inner
            .registry
            .events()
            .flat_map(|(n, bindings)| bindings.iter().map(move |b| (Arc::clone(n), b.clone())))
            .collect();
        for (name, binding) in event_bindings {
            for (index, node) in inner.locate(&name, "event forwarding") {
                let weak = weak.clone();
                let name = Arc::clone(&name);
                let binding = binding.clone();
                let event = binding.event.clone();
                live.listeners.push(inner.document.add_event_listener(node, &event, move |ev| {
                    if let Some(view) = View::upgrade(&weak) {
                        view.forward(&name, index, node, &binding, ev);
                    }
                }));
            }
        }

        for MountedHandler {
            node,
            index,
            handler,
        } in handlers
        {
            let weak = weak.clone();
            let event = Arc::clone(&handler.event);
            live.listeners.push(inner.document.add_event_listener(node, &event, move |ev| {
                if let Some(view) = View::upgrade(&weak) {
                    view.invoke(&handler, index, ev);
                }
            }));
        }

        debug!(
            view = %inner.id,
            observers = live.observer_count(),
            listeners = live.listener_count(),
            "Live bindings attached"
        );
        inner.live = live;
    }

    // ═══════════════════════════════════════════
    // DOM → MODEL
    // ═══════════════════════════════════════════

    /// Run every attribute binding of one node and write the result as one batch
    fn extract(&self, name: &Arc<str>, index: Option<usize>, node: NodeId) {
        let (model, guard, log, changes) = {
            let inner = self.inner.borrow();
            if inner.removed {
                return;
            }
            if !inner.document.contains(node) {
                warn!(view = %inner.id, node = %name, "Bound node vanished; extraction skipped");
                inner.log.emit(EngineEvent::NodeMissing {
                    node: Arc::clone(name),
                    purpose: "attribute extraction".into(),
                });
                return;
            }
            let changes = inner.collect_changes(name, index, node);
            (
                Rc::clone(&inner.model),
                inner.guard.clone(),
                inner.log.clone(),
                changes,
            )
        };

        log.emit(EngineEvent::ExtractionRan {
            node: Arc::clone(name),
        });
        if changes.is_empty() {
            return;
        }

        let fields: Vec<String> = changes.iter().map(|(path, _)| path.clone()).collect();
        let result = {
            let _token = guard.hold();
            model.set_batch(changes)
        };
        match result {
            Ok(()) => {
                debug!(node = %name, fields = ?fields, "Extracted values written");
                log.emit(EngineEvent::ModelWritten {
                    source: WriteSource::Extraction,
                    fields,
                });
            }
            Err(e) => {
                warn!(node = %name, error = %e, "Model rejected extracted batch; dropped");
                log.emit(EngineEvent::ModelWriteFailed {
                    fields,
                    error: e.to_string(),
                });
            }
        }
    }

    // ═══════════════════════════════════════════
    // EVENTS
    // ═══════════════════════════════════════════

    fn forward(
        &self,
        name: &Arc<str>,
        index: Option<usize>,
        node: NodeId,
        binding: &EventBinding,
        event: &DomEvent,
    ) {
        let Some((model, log, data)) = self.serialize(event, index) else {
            return;
        };
        model.emit_event(OutboundEvent {
            node: name.to_string(),
            event: binding.event.clone(),
            data: data.clone(),
        });
        debug!(node = %name, event = %binding.event, "Event forwarded");
        log.emit(EngineEvent::EventForwarded {
            node: Arc::clone(name),
            event: binding.event.clone(),
            payload: Value::Object(data),
        });

        let reextract = binding.reextract && self.inner.borrow().registry.has_attrs(name);
        if reextract {
            self.extract(name, index, node);
        }
    }

    fn invoke(&self, handler: &Handler, index: Option<usize>, event: &DomEvent) {
        let Some((model, log, mut data)) = self.serialize(event, index) else {
            return;
        };
        match &handler.action {
            HandlerAction::Forward { method } => {
                data.insert("callback".into(), Value::String(method.to_string()));
                model.emit_event(OutboundEvent {
                    node: handler.node.to_string(),
                    event: handler.event.to_string(),
                    data: data.clone(),
                });
                debug!(node = %handler.node, method = %method, "Callback forwarded");
                log.emit(EngineEvent::EventForwarded {
                    node: Arc::clone(&handler.node),
                    event: handler.event.to_string(),
                    payload: Value::Object(data),
                });
            }
            HandlerAction::Script(script) => {
                let (scripts, scope) = {
                    let inner = self.inner.borrow();
                    (Rc::clone(&inner.scripts), self.scope(&inner))
                };
                scope
                    .state
                    .borrow_mut()
                    .insert("event".into(), Value::Object(data));
                let result = scripts.run(script, &scope);
                scope.state.borrow_mut().remove("event");
                if let Err(e) = result {
                    warn!(script = %script, error = %e, "Event script failed");
                    log.emit(EngineEvent::ScriptAborted {
                        name: Arc::clone(script),
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    fn serialize(
        &self,
        event: &DomEvent,
        index: Option<usize>,
    ) -> Option<(Rc<dyn DataModel>, EventLog, Map<String, Value>)> {
        let inner = self.inner.borrow();
        if inner.removed {
            return None;
        }
        let mut data = inner.serializer.serialize(event, &inner.document);
        if let Some(i) = index {
            data.insert("index".into(), Value::from(i));
        }
        Some((Rc::clone(&inner.model), inner.log.clone(), data))
    }

    // ═══════════════════════════════════════════
    // SCRIPTS
    // ═══════════════════════════════════════════

    /// Run a named script now
    pub fn run_script(&self, name: &str) -> Result<Option<Value>> {
        let (scripts, scope) = {
            let inner = self.live()?;
            (Rc::clone(&inner.scripts), self.scope(&inner))
        };
        scripts.run(name, &scope)
    }

    fn run_logged(&self, name: &str) {
        if let Err(e) = self.run_script(name) {
            warn!(script = %name, error = %e, "Script failed");
            self.inner.borrow().log.emit(EngineEvent::ScriptAborted {
                name: name.into(),
                reason: e.to_string(),
            });
        }
    }

    /// Lifecycle scripts are optional; unset ones are not reported
    fn run_lifecycle(&self, name: &str) {
        if self.inner.borrow().scripts.contains(name) {
            self.run_logged(name);
        }
    }

    fn scope(&self, inner: &ViewInner) -> ViewScope {
        ViewScope {
            model: Rc::clone(&inner.model),
            document: inner.document.clone(),
            container: inner.container,
            view_id: Arc::clone(&inner.id),
            state: Rc::clone(&inner.state),
            log: inner.log.clone(),
            view: Rc::downgrade(&self.inner),
        }
    }
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.borrow();
        f.debug_struct("View")
            .field("id", &inner.id)
            .field("renders", &inner.renders)
            .field("live", &inner.live)
            .field("removed", &inner.removed)
            .finish()
    }
}

impl ViewInner {
    fn find(&self, name: &str, index: Option<usize>) -> Option<NodeId> {
        let id = node_id(name, index, &self.id);
        self.document
            .find_in(self.container, &id)
            .or_else(|| self.document.get_element_by_id(&id))
    }

    /// Live nodes of a bound name: one per looped instance, else one
    fn locate(&self, name: &Arc<str>, purpose: &str) -> Vec<(Option<usize>, NodeId)> {
        let indices: Vec<Option<usize>> = match self.loop_lens.get(&**name) {
            Some(len) => (0..*len).map(Some).collect(),
            None => vec![None],
        };
        indices
            .into_iter()
            .filter_map(|index| {
                let found = self.find(name, index);
                if found.is_none() {
                    warn!(
                        view = %self.id,
                        node = %node_id(name, index, &self.id),
                        purpose = %purpose,
                        "Bound node not in the document; binding skipped"
                    );
                    self.log.emit(EngineEvent::NodeMissing {
                        node: Arc::clone(name),
                        purpose: purpose.to_string(),
                    });
                }
                found.map(|node| (index, node))
            })
            .collect()
    }

    /// Changed fields of one node, merged across its attribute bindings
    fn collect_changes(
        &self,
        name: &Arc<str>,
        index: Option<usize>,
        node: NodeId,
    ) -> Vec<(String, Value)> {
        let mut batch: Vec<(String, Value)> = Vec::new();
        for binding in self.registry.attrs_for(name) {
            let Some(value) = read_property(&self.document, node, &binding.attr) else {
                debug!(node = %name, attr = %binding.attr, "Attribute absent; nothing to extract");
                continue;
            };
            let Some(extracted) = binding.pattern.extract(&value) else {
                warn!(
                    node = %name,
                    attr = %binding.attr,
                    value = %value,
                    pattern = %binding.pattern.source(),
                    "Attribute value does not match its pattern; fields left unchanged"
                );
                self.log.emit(EngineEvent::PatternMismatch {
                    node: Arc::clone(name),
                    attr: binding.attr.clone(),
                    value,
                });
                continue;
            };

            for field in &extracted.missing {
                warn!(node = %name, attr = %binding.attr, field = %field, "Placeholder missing from value");
                self.log.emit(EngineEvent::PlaceholderMissing {
                    node: Arc::clone(name),
                    attr: binding.attr.clone(),
                    field: field.clone(),
                    value: value.clone(),
                });
            }

            for (field, new) in extracted.values {
                let mut path = jsonpath::join(DATA_ROOT, &field);
                if let Some(i) = index {
                    path = jsonpath::join(&path, &i.to_string());
                }
                match self.model.get(&path) {
                    None => {
                        warn!(node = %name, field = %field, path = %path, "Bound field not in the model");
                        self.log.emit(EngineEvent::FieldUnresolved {
                            node: Arc::clone(name),
                            field,
                        });
                    }
                    Some(current) if current == new => {}
                    Some(_) => match batch.iter_mut().find(|(p, _)| *p == path) {
                        Some(slot) => slot.1 = new,
                        None => batch.push((path, new)),
                    },
                }
            }
        }
        batch
    }

    /// Unlink mounted children (of one slot, or all) so a rebuild keeps them
    fn detach_children(&self, slot: Option<&str>) {
        for ((s, _), child) in &self.children {
            if slot.is_some_and(|wanted| **s != *wanted) {
                continue;
            }
            for root in &child.roots {
                self.document.detach(*root);
            }
        }
    }

    /// Mount the entries of one slot, reusing cached children by key
    fn mount_slot(&mut self, slot: &ChildrenBinding, root: &Value, used: &mut FxHashSet<ChildKey>) {
        let literal = matches!(slot.source, ChildrenSource::Literal(_));
        // Without a builder, looped instances show their entries through
        // `${loop.value}` only
        let entries = if slot.looped && !literal && self.child_builder.is_none() {
            Vec::new()
        } else {
            child_entries(&slot.source, root)
        };

        let single = if slot.looped {
            None
        } else {
            let Some(target) = self.find(&slot.node, None) else {
                warn!(view = %self.id, node = %slot.node, "Children slot not in the document");
                self.log.emit(EngineEvent::NodeMissing {
                    node: Arc::clone(&slot.node),
                    purpose: "children".into(),
                });
                return;
            };
            self.document.clear_children(target);
            Some(target)
        };

        let mut seen: FxHashMap<String, usize> = FxHashMap::default();
        let mut count = 0;
        for (i, entry) in entries.iter().enumerate() {
            let target = match single {
                Some(target) => target,
                None => match self.find(&slot.node, Some(i)) {
                    Some(target) => target,
                    None => {
                        warn!(view = %self.id, node = %slot.node, index = i, "Looped instance not in the document");
                        self.log.emit(EngineEvent::NodeMissing {
                            node: Arc::clone(&slot.node),
                            purpose: "children".into(),
                        });
                        continue;
                    }
                },
            };

            let key = (Arc::clone(&slot.node), child_key(entry, &mut seen));
            let child = match self.children.remove(&key) {
                Some(child) => {
                    for root in &child.roots {
                        self.document.append_child(target, *root);
                    }
                    child
                }
                None => match self.build_child(entry, literal, target) {
                    Some(child) => child,
                    None => continue,
                },
            };
            used.insert(key.clone());
            self.children.insert(key, child);
            count += 1;
        }

        debug!(node = %slot.node, count, "Children mounted");
        self.log.emit(EngineEvent::ChildrenMounted {
            node: Arc::clone(&slot.node),
            count,
        });
    }

    fn build_child(&self, entry: &Value, literal: bool, target: NodeId) -> Option<MountedChild> {
        if !literal {
            if let Some(builder) = &self.child_builder {
                let view = builder.build(entry, &self.document)?;
                self.document.append_child(target, view.root());
                return Some(MountedChild {
                    roots: vec![view.root()],
                    view: Some(view),
                });
            }
        }
        let Value::String(markup) = entry else {
            debug!(view = %self.id, "No child builder for a model entry; skipped");
            return None;
        };
        match parse_fragment(markup) {
            Ok(forest) => Some(MountedChild {
                roots: forest.iter().map(|m| self.document.build(target, m)).collect(),
                view: None,
            }),
            Err(e) => {
                warn!(view = %self.id, error = %e, "Child markup rejected");
                None
            }
        }
    }

    /// Free cached children (of one slot, or all) not mounted this pass
    fn prune_children(&mut self, slot: Option<&str>, used: &FxHashSet<ChildKey>) {
        let stale: Vec<ChildKey> = self
            .children
            .keys()
            .filter(|key| slot.map_or(true, |s| *key.0 == *s) && !used.contains(*key))
            .cloned()
            .collect();
        for key in stale {
            if let Some(child) = self.children.remove(&key) {
                for root in child.roots {
                    self.document.remove(root);
                }
                if let Some(view) = child.view {
                    view.unmount();
                }
            }
        }
    }
}

// ═══════════════════════════════════════════
// SCRIPT SCOPE
// ═══════════════════════════════════════════

/// Handles a script needs, cloned out so no view borrow is held while it runs
struct ViewScope {
    model: Rc<dyn DataModel>,
    document: Document,
    container: NodeId,
    view_id: Arc<str>,
    state: Rc<RefCell<Map<String, Value>>>,
    log: EventLog,
    view: Weak<RefCell<ViewInner>>,
}

impl ScriptScope for ViewScope {
    fn model(&self) -> &dyn DataModel {
        &*self.model
    }

    fn document(&self) -> &Document {
        &self.document
    }

    fn container(&self) -> Option<NodeId> {
        Some(self.container)
    }

    fn view_id(&self) -> &str {
        &self.view_id
    }

    fn state(&self) -> &RefCell<Map<String, Value>> {
        &self.state
    }

    fn invalidate_render(&self) {
        schedule_render(self.document.host(), &self.view);
    }

    fn events(&self) -> &EventLog {
        &self.log
    }
}

// ═══════════════════════════════════════════
// HELPERS
// ═══════════════════════════════════════════

/// Queue a change unless a queued change of the same kind covers it; queued
/// changes it covers are absorbed. Returns whether a task should be deferred.
fn queue_change(pending: &RefCell<Vec<(String, bool)>>, path: &str, self_caused: bool) -> bool {
    let mut pending = pending.borrow_mut();
    if pending
        .iter()
        .any(|(queued, kind)| *kind == self_caused && jsonpath::within(path, queued))
    {
        return false;
    }
    pending.retain(|(queued, kind)| !(*kind == self_caused && jsonpath::within(queued, path)));
    pending.push((path.to_string(), self_caused));
    true
}

/// Claim a queued change; false when it was absorbed by a covering one
fn take_queued(pending: &RefCell<Vec<(String, bool)>>, path: &str, self_caused: bool) -> bool {
    let mut pending = pending.borrow_mut();
    match pending
        .iter()
        .position(|(queued, kind)| *kind == self_caused && queued == path)
    {
        Some(pos) => {
            pending.remove(pos);
            true
        }
        None => false,
    }
}

fn schedule_render(host: &HostLoop, view: &Weak<RefCell<ViewInner>>) {
    let weak = view.clone();
    host.defer(move || {
        if let Some(view) = View::upgrade(&weak) {
            if let Err(e) = view.render_with(RenderCause::Deferred) {
                debug!(error = %e, "Deferred render skipped");
            }
        }
    });
}

/// Log a compile failure; in development mode also show it in the container
fn report_failure(
    document: &Document,
    container: NodeId,
    log: &EventLog,
    dev_mode: bool,
    err: &TesseraError,
) {
    error!(error = %err, "Widget template failed to compile");
    log.emit(EngineEvent::TemplateFailed {
        error: err.to_string(),
    });
    if dev_mode {
        document.clear_children(container);
        let pre = document.create_element("pre");
        document.set_attribute(pre, "class", DEV_ERROR_CLASS);
        document.set_text_content(pre, &err.to_string());
        document.append_child(container, pre);
    }
}

/// Text-like properties first, then plain attributes
fn read_property(document: &Document, node: NodeId, name: &str) -> Option<String> {
    match name {
        "textContent" | "text" | "innerText" => Some(document.text_content(node)),
        "innerHTML" => Some(document.inner_html(node)),
        _ => document.attribute(node, name),
    }
}

/// Entries of a children source: array elements, a lone value, or literals
fn child_entries(source: &ChildrenSource, root: &Value) -> Vec<Value> {
    match source {
        ChildrenSource::Field(field) => {
            let value = root
                .get(DATA_ROOT)
                .and_then(|data| jsonpath::resolve(data, field));
            match value {
                Some(Value::Array(items)) => items.clone(),
                Some(Value::Null) | None => Vec::new(),
                Some(other) => vec![other.clone()],
            }
        }
        ChildrenSource::Literal(items) => items.iter().cloned().map(Value::String).collect(),
    }
}

/// Backing arrays of every looped slot
fn loop_arrays(registry: &BindingRegistry, root: &Value) -> FxHashMap<String, Vec<Value>> {
    registry
        .children()
        .filter(|slot| slot.looped)
        .map(|slot| (slot.node.to_string(), child_entries(&slot.source, root)))
        .collect()
}

/// Identity of a child entry: its `id` field when it has one, else its JSON
/// text; repeats are numbered
fn child_key(entry: &Value, seen: &mut FxHashMap<String, usize>) -> String {
    let base = match entry.get("id") {
        Some(Value::String(id)) => format!("id:{id}"),
        Some(Value::Number(id)) => format!("id:{id}"),
        _ => entry.to_string(),
    };
    let n = seen.entry(base.clone()).or_insert(0);
    *n += 1;
    format!("{base}#{n}")
}
