//! Template compiler with a process-wide cache
//!
//! A template is HTML with placeholders:
//! - `${name}` / `${data.name}`: read from the view's data object
//! - `${model.name}`: read from the model root
//! - `${loop.index}` / `${loop.value}`: current position and element inside a
//!   looped node
//! - `on<event>="${method}"`: forward the event to the model
//! - `on<event>="${script('name')}"`: run a named script
//! - `\${`: a literal `${`
//!
//! Addressed nodes carry `id="name"` or `id="name-{id}"`; `{id}` is the view
//! id. Looped instances render as `name-<index>-<view id>`.
//!
//! `compile` parses a template once per distinct (template, methods) pair and
//! hands out shared [`CompiledTemplate`]s. Rendering only builds a [`VNode`]
//! tree; it never touches the document.

pub mod vdom;

use std::sync::Arc;

use dashmap::DashMap;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use serde_json::Value;
use tracing::debug;

use crate::dom::markup::{self, Markup};
use crate::error::{Result, TesseraError};
use crate::util::constants::{DATA_ROOT, MAX_CACHED_TEMPLATES};
use crate::util::jsonpath;

pub use vdom::{Handler, HandlerAction, MountedHandler, VElement, VNode};

/// Process-wide compile cache, keyed by template text and method names
///
/// Bounded by `MAX_CACHED_TEMPLATES`; when full it is emptied before the next
/// insert, since live views keep their own `Arc` to what they compiled.
static COMPILED: Lazy<DashMap<String, Arc<CompiledTemplate>>> = Lazy::new(DashMap::new);

/// Compile `template`, reusing an earlier compilation of the same input
pub fn compile(template: &str, methods: &[String]) -> Result<Arc<CompiledTemplate>> {
    let key = cache_key(template, methods);
    if let Some(cached) = COMPILED.get(&key) {
        return Ok(Arc::clone(&cached));
    }

    let compiled = Arc::new(CompiledTemplate::parse(template, methods)?);
    debug!(
        bytes = template.len(),
        methods = methods.len(),
        "Compiled template"
    );
    if COMPILED.len() >= MAX_CACHED_TEMPLATES {
        debug!(entries = COMPILED.len(), "Template cache full; cleared");
        COMPILED.clear();
    }
    COMPILED.insert(key, Arc::clone(&compiled));
    Ok(compiled)
}

/// Number of cached compilations
pub fn cache_len() -> usize {
    COMPILED.len()
}

fn cache_key(template: &str, methods: &[String]) -> String {
    let mut key = String::with_capacity(template.len() + 32);
    for method in methods {
        key.push_str(method);
        key.push('\u{1f}');
    }
    key.push('\u{0}');
    key.push_str(template);
    key
}

// ═══════════════════════════════════════════
// PLACEHOLDERS
// ═══════════════════════════════════════════

/// What a `${...}` placeholder refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// Path relative to the data object ("" is the data object itself)
    Data(String),
    /// Path relative to the model root
    Model(String),
    /// `loop.index`
    LoopIndex,
    /// `loop.value` plus an optional sub-path
    LoopValue(String),
    /// Bound method name (callback)
    Method(String),
    /// `script('name')` (callback)
    Script(String),
}

impl Reference {
    fn is_callback(&self) -> bool {
        matches!(self, Reference::Method(_) | Reference::Script(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Piece {
    Literal(String),
    Ref(Reference),
}

/// Text with placeholders
#[derive(Debug, Clone, PartialEq, Default)]
struct Interp(Vec<Piece>);

impl Interp {
    fn parse(text: &str, methods: &[String]) -> Result<Self> {
        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut rest = text;
        let mut offset = 0;

        while let Some(at) = rest.find("${") {
            // `\${` is an escaped literal
            if rest[..at].ends_with('\\') {
                literal.push_str(&rest[..at - 1]);
                literal.push_str("${");
                rest = &rest[at + 2..];
                offset += at + 2;
                continue;
            }
            literal.push_str(&rest[..at]);
            let body_start = at + 2;
            let Some(len) = rest[body_start..].find('}') else {
                return Err(TesseraError::TemplateParse {
                    position: offset + at,
                    details: "unterminated placeholder".into(),
                });
            };
            let body = rest[body_start..body_start + len].trim();
            let reference = parse_reference(body, methods).map_err(|details| {
                TesseraError::TemplateParse {
                    position: offset + at,
                    details,
                }
            })?;
            if !literal.is_empty() {
                pieces.push(Piece::Literal(std::mem::take(&mut literal)));
            }
            pieces.push(Piece::Ref(reference));
            let consumed = body_start + len + 1;
            rest = &rest[consumed..];
            offset += consumed;
        }
        literal.push_str(rest);
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }
        Ok(Self(pieces))
    }

    fn is_static(&self) -> bool {
        self.0.iter().all(|p| matches!(p, Piece::Literal(_)))
    }

    fn as_literal(&self) -> String {
        self.0
            .iter()
            .filter_map(|p| match p {
                Piece::Literal(s) => Some(s.as_str()),
                Piece::Ref(_) => None,
            })
            .collect()
    }

    /// The single callback this text consists of, if any
    fn sole_callback(&self) -> Option<&Reference> {
        match self.0.as_slice() {
            [Piece::Ref(r)] if r.is_callback() => Some(r),
            _ => None,
        }
    }

    fn callback(&self) -> Option<&Reference> {
        self.0.iter().find_map(|p| match p {
            Piece::Ref(r) if r.is_callback() => Some(r),
            _ => None,
        })
    }

    fn render(&self, scope: &RenderScope<'_>, frame: Option<&LoopFrame<'_>>) -> String {
        let mut out = String::new();
        for piece in &self.0 {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Ref(reference) => {
                    if let Some(value) = scope.read(reference, frame) {
                        push_value(&mut out, &value);
                    }
                }
            }
        }
        out
    }
}

fn parse_reference(body: &str, methods: &[String]) -> std::result::Result<Reference, String> {
    if let Some(args) = body.strip_prefix("script(") {
        let inner = args
            .strip_suffix(')')
            .map(str::trim)
            .ok_or_else(|| format!("malformed script call '{body}'"))?;
        let name = inner
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
            .filter(|name| !name.is_empty())
            .ok_or_else(|| format!("script() expects a quoted name, got '{inner}'"))?;
        return Ok(Reference::Script(name.to_string()));
    }

    if body.is_empty() || jsonpath::parse(body).is_err() || !is_path(body) {
        return Err(format!("unsupported expression '{body}'"));
    }

    let (head, tail) = match body.split_once('.') {
        Some((head, tail)) => (head, tail),
        None => (body, ""),
    };
    Ok(match head {
        "data" => Reference::Data(tail.to_string()),
        "model" => Reference::Model(tail.to_string()),
        "loop" => match tail {
            "index" => Reference::LoopIndex,
            "value" => Reference::LoopValue(String::new()),
            _ => match tail.strip_prefix("value.") {
                Some(sub) => Reference::LoopValue(sub.to_string()),
                None => return Err(format!("unknown loop variable '{body}'")),
            },
        },
        _ if tail.is_empty() && methods.iter().any(|m| m == body) => {
            Reference::Method(body.to_string())
        }
        _ => Reference::Data(body.to_string()),
    })
}

fn is_path(body: &str) -> bool {
    body.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_')
        && body
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '[' | ']'))
}

fn push_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        other => out.push_str(&other.to_string()),
    }
}

// ═══════════════════════════════════════════
// COMPILED TREE
// ═══════════════════════════════════════════

#[derive(Debug, Clone)]
enum CNode {
    Element(CElement),
    Text(Interp),
}

#[derive(Debug, Clone)]
struct CElement {
    tag: String,
    attrs: Vec<(String, Interp)>,
    children: Vec<CNode>,
    name: Option<Arc<str>>,
    handlers: Vec<Handler>,
}

/// Loop context for one looped instance
struct LoopFrame<'a> {
    index: usize,
    value: &'a Value,
}

/// Inputs to one render
#[derive(Debug, Clone, Copy)]
pub struct RenderScope<'a> {
    /// Model root; data lives under `data`
    pub model: &'a Value,
    pub view_id: &'a str,
    /// Backing arrays of looped nodes, by node name
    pub loops: &'a FxHashMap<String, Vec<Value>>,
}

impl RenderScope<'_> {
    fn read(&self, reference: &Reference, frame: Option<&LoopFrame<'_>>) -> Option<Value> {
        match reference {
            Reference::Data(path) => {
                let data = self.model.get(DATA_ROOT)?;
                jsonpath::resolve(data, path).cloned()
            }
            Reference::Model(path) => jsonpath::resolve(self.model, path).cloned(),
            Reference::LoopIndex => frame.map(|f| Value::from(f.index)),
            Reference::LoopValue(path) => {
                frame.and_then(|f| jsonpath::resolve(f.value, path).cloned())
            }
            Reference::Method(_) | Reference::Script(_) => None,
        }
    }
}

/// Render id for a node name
pub fn node_id(name: &str, index: Option<usize>, view_id: &str) -> String {
    match index {
        Some(i) => format!("{name}-{i}-{view_id}"),
        None => format!("{name}-{view_id}"),
    }
}

/// A parsed template, shared through the compile cache
#[derive(Debug)]
pub struct CompiledTemplate {
    source: String,
    roots: Vec<CNode>,
    names: Vec<Arc<str>>,
    handlers: Vec<Handler>,
}

impl CompiledTemplate {
    fn parse(template: &str, methods: &[String]) -> Result<Self> {
        // Validate placeholders over the raw text so positions are absolute
        Interp::parse(template, methods)?;

        let forest = markup::parse_fragment(template).map_err(|e| TesseraError::TemplateParse {
            position: 0,
            details: e.to_string(),
        })?;

        let mut compiled = Self {
            source: template.to_string(),
            roots: Vec::with_capacity(forest.len()),
            names: Vec::new(),
            handlers: Vec::new(),
        };
        for node in &forest {
            let node = compiled.convert(node, methods)?;
            compiled.roots.push(node);
        }
        Ok(compiled)
    }

    fn convert(&mut self, node: &Markup, methods: &[String]) -> Result<CNode> {
        let (tag, attrs, children) = match node {
            Markup::Text(text) => {
                let interp = Interp::parse(text, methods)?;
                if let Some(reference) = interp.callback() {
                    return Err(misplaced_callback(reference));
                }
                return Ok(CNode::Text(interp));
            }
            Markup::Element {
                tag,
                attrs,
                children,
            } => (tag, attrs, children),
        };

        let name = attrs
            .iter()
            .find(|(k, _)| k == "id")
            .and_then(|(_, v)| node_name(v))
            .map(Arc::<str>::from);
        if let Some(name) = &name {
            self.names.push(Arc::clone(name));
        }

        let mut element = CElement {
            tag: tag.clone(),
            attrs: Vec::with_capacity(attrs.len()),
            children: Vec::with_capacity(children.len()),
            name: name.clone(),
            handlers: Vec::new(),
        };

        for (key, value) in attrs {
            if key == "id" && name.is_some() {
                continue;
            }
            let interp = Interp::parse(value, methods)?;
            let event = key.strip_prefix("on").filter(|e| !e.is_empty());
            match (event, interp.sole_callback()) {
                (Some(event), Some(reference)) => {
                    let Some(node) = &name else {
                        return Err(TesseraError::CallbackWithoutNode {
                            method: callback_label(reference),
                            tag: tag.clone(),
                        });
                    };
                    let action = match reference {
                        Reference::Script(script) => HandlerAction::Script(script.as_str().into()),
                        other => HandlerAction::Forward {
                            method: callback_label(other).into(),
                        },
                    };
                    let handler = Handler {
                        node: Arc::clone(node),
                        event: event.into(),
                        action,
                    };
                    self.handlers.push(handler.clone());
                    element.handlers.push(handler);
                }
                _ => {
                    if let Some(reference) = interp.callback() {
                        return Err(misplaced_callback(reference));
                    }
                    element.attrs.push((key.clone(), interp));
                }
            }
        }

        for child in children {
            let child = self.convert(child, methods)?;
            element.children.push(child);
        }
        Ok(CNode::Element(element))
    }

    /// Raw template text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether `path` appears anywhere in the template text
    ///
    /// Coarse on purpose: a change to `a` and a change to `a.b` look the same.
    pub fn references(&self, path: &str) -> bool {
        !path.is_empty() && self.source.contains(path)
    }

    /// Names of all addressed nodes, in document order
    pub fn node_names(&self) -> &[Arc<str>] {
        &self.names
    }

    pub fn has_node(&self, name: &str) -> bool {
        self.names.iter().any(|n| &**n == name)
    }

    /// Every callback declared in the template
    pub fn handlers(&self) -> &[Handler] {
        &self.handlers
    }

    /// Produce the virtual document for `scope`
    pub fn render(&self, scope: &RenderScope<'_>) -> Vec<VNode> {
        let mut out = Vec::with_capacity(self.roots.len());
        for node in &self.roots {
            render_node(node, scope, None, &mut out);
        }
        out
    }
}

fn callback_label(reference: &Reference) -> String {
    match reference {
        Reference::Method(name) => name.clone(),
        Reference::Script(name) => format!("script('{name}')"),
        _ => String::new(),
    }
}

fn misplaced_callback(reference: &Reference) -> TesseraError {
    TesseraError::TemplateParse {
        position: 0,
        details: format!(
            "callback '{}' is only allowed as the whole value of an on<event> attribute",
            callback_label(reference)
        ),
    }
}

/// `name` or `name-{id}`; anything else with braces is not addressable
fn node_name(id: &str) -> Option<&str> {
    let name = id.strip_suffix("-{id}").unwrap_or(id);
    let valid = !name.is_empty()
        && !name.contains(['{', '}', '$'])
        && !name.chars().any(char::is_whitespace);
    valid.then_some(name)
}

fn render_node(node: &CNode, scope: &RenderScope<'_>, frame: Option<&LoopFrame<'_>>, out: &mut Vec<VNode>) {
    match node {
        CNode::Text(text) => {
            let rendered = text.render(scope, frame);
            if !rendered.is_empty() {
                out.push(VNode::Text(rendered));
            }
        }
        CNode::Element(element) => {
            let looped = element
                .name
                .as_ref()
                .and_then(|name| scope.loops.get(&**name));
            match looped {
                Some(items) => {
                    for (index, value) in items.iter().enumerate() {
                        let frame = LoopFrame { index, value };
                        out.push(render_element(element, scope, Some(&frame), Some(index)));
                    }
                }
                None => out.push(render_element(element, scope, frame, None)),
            }
        }
    }
}

fn render_element(
    element: &CElement,
    scope: &RenderScope<'_>,
    frame: Option<&LoopFrame<'_>>,
    index: Option<usize>,
) -> VNode {
    let mut attrs = Vec::with_capacity(element.attrs.len() + 1);
    if let Some(name) = &element.name {
        attrs.push(("id".to_string(), node_id(name, index, scope.view_id)));
    }
    for (key, value) in &element.attrs {
        let rendered = if value.is_static() {
            value.as_literal()
        } else {
            value.render(scope, frame)
        };
        attrs.push((key.clone(), rendered));
    }

    let mut children = Vec::with_capacity(element.children.len());
    for child in &element.children {
        render_node(child, scope, frame, &mut children);
    }

    VNode::Element(VElement {
        tag: element.tag.clone(),
        attrs,
        children,
        name: element.name.clone(),
        index,
        handlers: element.handlers.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn render_html(template: &str, methods: &[&str], model: Value) -> String {
        let methods: Vec<String> = methods.iter().map(|s| s.to_string()).collect();
        let compiled = compile(template, &methods).unwrap();
        let loops = FxHashMap::default();
        let scope = RenderScope {
            model: &model,
            view_id: "w1",
            loops: &loops,
        };
        vdom::to_html(&compiled.render(&scope))
    }

    // ═══════════════════════════════════════════════════════════════
    // Placeholders
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn bare_and_data_paths_read_data() {
        let html = render_html(
            "<div id=\"label-{id}\">${name} / ${data.name}</div>",
            &[],
            json!({"data": {"name": "A"}}),
        );
        assert_eq!(html, "<div id=\"label-w1\">A / A</div>");
    }

    #[test]
    fn model_paths_read_root() {
        let html = render_html(
            "<span>${model.title}:${title}</span>",
            &[],
            json!({"title": "root", "data": {"title": "inner"}}),
        );
        assert_eq!(html, "<span>root:inner</span>");
    }

    #[test]
    fn escaped_placeholder_is_literal() {
        let html = render_html("<p>\\${name}</p>", &[], json!({"data": {"name": "x"}}));
        assert_eq!(html, "<p>${name}</p>");
    }

    #[test]
    fn missing_values_render_empty() {
        let html = render_html("<p class=\"${cls}\">${gone}</p>", &[], json!({"data": {}}));
        assert_eq!(html, "<p class=\"\"></p>");
    }

    #[test]
    fn unterminated_placeholder_reports_position() {
        let err = compile("<p>${name</p>", &[]).unwrap_err();
        match err {
            TesseraError::TemplateParse { position, .. } => assert_eq!(position, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn malformed_script_call_fails() {
        let err = compile("<b id=\"b\" onclick=\"${script(go)}\"></b>", &[]).unwrap_err();
        assert!(err.to_string().contains("TSR-010"));
    }

    // ═══════════════════════════════════════════════════════════════
    // Callbacks
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn callbacks_become_handlers() {
        let methods = vec!["_click".to_string()];
        let compiled = compile(
            "<button id=\"btn\" onclick=\"${_click}\" onmouseover=\"${script('hover')}\">Go</button>",
            &methods,
        )
        .unwrap();
        assert_eq!(
            compiled.handlers(),
            &[
                Handler {
                    node: "btn".into(),
                    event: "click".into(),
                    action: HandlerAction::Forward {
                        method: "_click".into()
                    },
                },
                Handler {
                    node: "btn".into(),
                    event: "mouseover".into(),
                    action: HandlerAction::Script("hover".into()),
                },
            ]
        );
        let html = render_html(
            "<button id=\"btn\" onclick=\"${_click}\" onmouseover=\"${script('hover')}\">Go</button>",
            &["_click"],
            json!({"data": {}}),
        );
        assert_eq!(html, "<button id=\"btn-w1\">Go</button>");
    }

    #[test]
    fn callback_needs_an_addressed_node() {
        let err = compile("<button onclick=\"${script('x')}\"></button>", &[]).unwrap_err();
        assert!(matches!(err, TesseraError::CallbackWithoutNode { .. }));
    }

    #[test]
    fn names_that_are_not_methods_are_data() {
        let compiled = compile("<p>${_click}</p>", &[]).unwrap();
        assert!(compiled.handlers().is_empty());
    }

    // ═══════════════════════════════════════════════════════════════
    // Loops / cache
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn looped_nodes_expand_per_element() {
        let compiled = compile(
            "<ul><li id=\"item\" data-pos=\"${loop.index}\">${loop.value.label}</li></ul>",
            &[],
        )
        .unwrap();
        let mut loops = FxHashMap::default();
        loops.insert(
            "item".to_string(),
            vec![json!({"label": "a"}), json!({"label": "b"})],
        );
        let model = json!({"data": {}});
        let scope = RenderScope {
            model: &model,
            view_id: "w1",
            loops: &loops,
        };
        assert_eq!(
            vdom::to_html(&compiled.render(&scope)),
            "<ul><li id=\"item-0-w1\" data-pos=\"0\">a</li><li id=\"item-1-w1\" data-pos=\"1\">b</li></ul>"
        );
    }

    #[test]
    fn compile_is_cached() {
        let template = "<i id=\"cache-hit\">${cached}</i>";
        let first = compile(template, &[]).unwrap();
        let second = compile(template, &[]).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(cache_len() >= 1);
    }

    #[test]
    fn substring_trigger() {
        let compiled = compile("<p>${data.count}</p>", &[]).unwrap();
        assert!(compiled.references("count"));
        assert!(!compiled.references("name"));
        assert_eq!(compiled.node_names(), &[] as &[Arc<str>]);
    }
}
