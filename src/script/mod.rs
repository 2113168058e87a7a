//! Script Host - named behaviors on a restricted interpreter
//!
//! Scripts are compiled once per view from the widget's `scripts` block:
//! - `lexer` / `parser`: source → AST
//! - `eval`: tree-walking interpreter over JSON values and document nodes
//!
//! Every script sees `data`, `model`, `state` (per-view scratch object that
//! persists across calls), `view` (`view.id`, `view.invalidate_render()`),
//! `script(name)` and `self` (`self.<name>()` for any compiled script,
//! `self.get_records(field)` for columnar data). Node names appearing in the
//! source (`-` written as `_`) are resolved before the body runs; a missing
//! node aborts that invocation.

mod eval;
mod lexer;
mod parser;

use std::cell::RefCell;
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::dom::{Document, NodeId};
use crate::error::{Result, TesseraError};
use crate::event::{EngineEvent, EventLog};
use crate::model::DataModel;
use crate::template::node_id;

use eval::{Frame, Val};
use parser::Stmt;

/// Names a script cannot use for node references
const RESERVED: [&str; 6] = ["data", "model", "state", "view", "self", "script"];

/// Everything a running script can reach, provided by the view
pub trait ScriptScope {
    fn model(&self) -> &dyn DataModel;
    fn document(&self) -> &Document;
    /// View container; node lookups try it before the whole document
    fn container(&self) -> Option<NodeId>;
    fn view_id(&self) -> &str;
    fn state(&self) -> &RefCell<Map<String, Value>>;
    /// Queue a full re-render for a later host-loop turn
    fn invalidate_render(&self);
    fn events(&self) -> &EventLog;
}

#[derive(Debug, Clone)]
struct NodeRef {
    var: String,
    name: Arc<str>,
}

/// A compiled script
#[derive(Debug, Clone)]
pub struct Script {
    name: Arc<str>,
    body: Vec<Stmt>,
    nodes: Vec<NodeRef>,
}

impl Script {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Node names this script resolves before running
    pub fn node_refs(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| &*n.name)
    }
}

/// Compile `source`, recording a lookup for every node name it mentions
pub fn compile(name: &str, source: &str, node_names: &[Arc<str>]) -> Result<Script> {
    let tokens = lexer::tokenize(name, source)?;
    let free: FxHashSet<&str> = lexer::free_identifiers(&tokens).collect();
    let nodes = node_names
        .iter()
        .filter_map(|node| {
            let var = node.replace('-', "_");
            (free.contains(var.as_str()) && !RESERVED.contains(&var.as_str())).then(|| NodeRef {
                var,
                name: Arc::clone(node),
            })
        })
        .collect();
    let body = parser::parse(name, &tokens, source.len())?;
    Ok(Script {
        name: name.into(),
        body,
        nodes,
    })
}

/// The compiled scripts of one view
#[derive(Debug, Clone)]
pub struct ScriptHost {
    scripts: FxHashMap<Arc<str>, Script>,
    max_depth: usize,
}

impl ScriptHost {
    pub fn new(max_depth: usize) -> Self {
        Self {
            scripts: FxHashMap::default(),
            max_depth,
        }
    }

    /// Compile every `(name, source)` pair
    pub fn build<'a>(
        sources: impl IntoIterator<Item = (&'a str, &'a str)>,
        node_names: &[Arc<str>],
        max_depth: usize,
    ) -> Result<Self> {
        let mut host = Self::new(max_depth);
        for (name, source) in sources {
            host.insert(compile(name, source, node_names)?);
        }
        Ok(host)
    }

    pub fn insert(&mut self, script: Script) {
        self.scripts.insert(Arc::clone(&script.name), script);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scripts.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&Script> {
        self.scripts.get(name)
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// Run a script by name
    ///
    /// `Ok(None)` when nothing ran: the name is not registered, or a node the
    /// script references is missing. Both are recorded in the scope's log.
    pub fn run(&self, name: &str, scope: &dyn ScriptScope) -> Result<Option<Value>> {
        self.run_at(name, scope, 0)
    }

    pub(crate) fn run_at(
        &self,
        name: &str,
        scope: &dyn ScriptScope,
        depth: usize,
    ) -> Result<Option<Value>> {
        if depth > self.max_depth {
            return Err(TesseraError::ScriptDepth {
                name: name.to_string(),
                limit: self.max_depth,
            });
        }
        let log = scope.events();
        let Some(script) = self.scripts.get(name) else {
            debug!(script = %name, "No such script; skipped");
            log.emit(EngineEvent::ScriptMissing { name: name.into() });
            return Ok(None);
        };

        let mut locals = FxHashMap::default();
        for node in &script.nodes {
            let Some(val) = resolve_node(scope, &node.name) else {
                warn!(script = %name, node = %node.name, "Script node not found; invocation aborted");
                log.emit(EngineEvent::NodeMissing {
                    node: Arc::clone(&node.name),
                    purpose: format!("script '{name}'"),
                });
                log.emit(EngineEvent::ScriptAborted {
                    name: Arc::clone(&script.name),
                    reason: format!("node '{}' not found", node.name),
                });
                return Ok(None);
            };
            locals.insert(node.var.clone(), val);
        }

        let mut frame = Frame {
            host: self,
            scope,
            name: &script.name,
            depth,
            locals,
        };
        let value = frame.run(&script.body)?;
        log.emit(EngineEvent::ScriptRan {
            name: Arc::clone(&script.name),
        });
        Ok(Some(value))
    }
}

/// Look a node up in the container, then the document; looped nodes resolve
/// to the list of their instances
fn resolve_node(scope: &dyn ScriptScope, name: &str) -> Option<Val> {
    let document = scope.document();
    let find = |id: &str| {
        scope
            .container()
            .and_then(|c| document.find_in(c, id))
            .or_else(|| document.get_element_by_id(id))
    };

    if let Some(found) = find(&node_id(name, None, scope.view_id())) {
        return Some(Val::Node(found));
    }
    let instances: Vec<NodeId> = (0..)
        .map_while(|i| find(&node_id(name, Some(i), scope.view_id())))
        .collect();
    (!instances.is_empty()).then_some(Val::Nodes(instances))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryModel;
    use crate::runtime::HostLoop;
    use serde_json::json;
    use std::cell::Cell;

    struct TestScope {
        model: MemoryModel,
        document: Document,
        state: RefCell<Map<String, Value>>,
        log: EventLog,
        invalidated: Cell<usize>,
    }

    impl TestScope {
        fn new(data: Value) -> Self {
            Self {
                model: MemoryModel::new(json!({ "data": data })),
                document: Document::new(HostLoop::new()),
                state: RefCell::new(Map::new()),
                log: EventLog::new(),
                invalidated: Cell::new(0),
            }
        }
    }

    impl ScriptScope for TestScope {
        fn model(&self) -> &dyn DataModel {
            &self.model
        }
        fn document(&self) -> &Document {
            &self.document
        }
        fn container(&self) -> Option<NodeId> {
            None
        }
        fn view_id(&self) -> &str {
            "w1"
        }
        fn state(&self) -> &RefCell<Map<String, Value>> {
            &self.state
        }
        fn invalidate_render(&self) {
            self.invalidated.set(self.invalidated.get() + 1);
        }
        fn events(&self) -> &EventLog {
            &self.log
        }
    }

    fn host(scripts: &[(&str, &str)], nodes: &[&str]) -> ScriptHost {
        let nodes: Vec<Arc<str>> = nodes.iter().map(|n| Arc::from(*n)).collect();
        ScriptHost::build(scripts.iter().copied(), &nodes, 8).unwrap()
    }

    #[test]
    fn arithmetic_and_return() {
        let host = host(&[("calc", "let x = data.n * 2 + 1; return x % 4")], &[]);
        let scope = TestScope::new(json!({"n": 5}));
        assert_eq!(host.run("calc", &scope).unwrap(), Some(json!(3)));
    }

    #[test]
    fn writes_data_and_state() {
        let host = host(
            &[("bump", "data.count = data.count + 1; state.seen = (state.seen || 0) + 1")],
            &[],
        );
        let scope = TestScope::new(json!({"count": 1}));
        host.run("bump", &scope).unwrap();
        host.run("bump", &scope).unwrap();
        assert_eq!(scope.model.get("data.count"), Some(json!(3)));
        assert_eq!(scope.state.borrow()["seen"], json!(2));
    }

    #[test]
    fn node_properties() {
        let host = host(
            &[("paint", "out_label.textContent = 'n=' + data.n; out_label.class = 'hot'")],
            &["out-label"],
        );
        let scope = TestScope::new(json!({"n": 4}));
        let body = scope.document.body();
        scope
            .document
            .set_inner_html(body, "<span id=\"out-label-w1\"></span>")
            .unwrap();
        host.run("paint", &scope).unwrap();
        let label = scope.document.get_element_by_id("out-label-w1").unwrap();
        assert_eq!(scope.document.text_content(label), "n=4");
        assert_eq!(scope.document.attribute(label, "class").as_deref(), Some("hot"));
    }

    #[test]
    fn missing_node_aborts_invocation() {
        let host = host(&[("paint", "data.touched = true; label.text = 'x'")], &["label"]);
        let scope = TestScope::new(json!({}));
        assert_eq!(host.run("paint", &scope).unwrap(), None);
        // Aborted before the body ran
        assert_eq!(scope.model.get("data.touched"), None);
        assert_eq!(
            scope.log.count(|e| matches!(e, EngineEvent::NodeMissing { .. })),
            1
        );
    }

    #[test]
    fn unknown_script_is_a_noop() {
        let host = host(&[], &[]);
        let scope = TestScope::new(json!({}));
        assert_eq!(host.run("optional", &scope).unwrap(), None);
        assert_eq!(
            scope.log.count(|e| matches!(e, EngineEvent::ScriptMissing { .. })),
            1
        );
    }

    #[test]
    fn scripts_call_each_other() {
        let host = host(
            &[
                ("double", "return data.n * 2"),
                ("quad", "return self.double() + script('double')"),
            ],
            &[],
        );
        let scope = TestScope::new(json!({"n": 3}));
        assert_eq!(host.run("quad", &scope).unwrap(), Some(json!(12)));
    }

    #[test]
    fn recursion_is_bounded() {
        let host = host(&[("again", "script('again')")], &[]);
        let scope = TestScope::new(json!({}));
        let err = host.run("again", &scope).unwrap_err();
        assert!(matches!(err, TesseraError::ScriptDepth { limit: 8, .. }));
    }

    #[test]
    fn get_records_and_view_hooks() {
        let host = host(
            &[("rows", "view.invalidate_render(); return len(self.get_records('table'))")],
            &[],
        );
        let scope = TestScope::new(json!({"table": {"a": [1, 2, 3], "b": [4, 5, 6]}}));
        assert_eq!(host.run("rows", &scope).unwrap(), Some(json!(3)));
        assert_eq!(scope.invalidated.get(), 1);
    }

    #[test]
    fn runtime_errors_surface() {
        let host = host(&[("bad", "return 1 / 0")], &[]);
        let scope = TestScope::new(json!({}));
        let err = host.run("bad", &scope).unwrap_err();
        assert!(err.to_string().contains("TSR-041"));
    }

    #[test]
    fn reserved_names_are_not_nodes() {
        let script = compile("s", "data.x = 1", &[Arc::from("data")]).unwrap();
        assert_eq!(script.node_refs().count(), 0);
    }
}
