//! Virtual document - what a render produced, before it touches the document

use std::sync::Arc;

use crate::dom::markup;
use crate::dom::{Document, NodeId};
use crate::util::entities;

/// What a callback attribute does when its event fires
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerAction {
    /// Forward the event to the model (`on<event>="${method}"`)
    Forward { method: Arc<str> },
    /// Run a named script with `state.event` set (`${script('name')}`)
    Script(Arc<str>),
}

/// Invocation wrapper for a callback attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handler {
    /// Node name the callback was declared on
    pub node: Arc<str>,
    /// DOM event name, without the `on` prefix
    pub event: Arc<str>,
    pub action: HandlerAction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VElement {
    pub tag: String,
    /// Attributes with placeholders already substituted; ids rendered
    pub attrs: Vec<(String, String)>,
    pub children: Vec<VNode>,
    /// Node name for addressed elements (`id="name-{id}"`)
    pub name: Option<Arc<str>>,
    /// Position for looped instances
    pub index: Option<usize>,
    pub handlers: Vec<Handler>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VNode {
    Element(VElement),
    Text(String),
}

/// A callback handler together with the document node it landed on
#[derive(Debug, Clone)]
pub struct MountedHandler {
    pub node: NodeId,
    pub index: Option<usize>,
    pub handler: Handler,
}

/// Materialize `nodes` under `parent`, returning every callback handler with
/// the node that carries it
pub fn materialize(document: &Document, parent: NodeId, nodes: &[VNode]) -> Vec<MountedHandler> {
    let mut handlers = Vec::new();
    for node in nodes {
        build(document, parent, node, &mut handlers);
    }
    handlers
}

fn build(document: &Document, parent: NodeId, node: &VNode, handlers: &mut Vec<MountedHandler>) {
    match node {
        VNode::Text(text) => {
            let id = document.create_text(text);
            document.append_child(parent, id);
        }
        VNode::Element(element) => {
            let id = document.create_element(&element.tag);
            for (name, value) in &element.attrs {
                document.set_attribute(id, name, value);
            }
            handlers.extend(element.handlers.iter().map(|h| MountedHandler {
                node: id,
                index: element.index,
                handler: h.clone(),
            }));
            for child in &element.children {
                build(document, id, child, handlers);
            }
            document.append_child(parent, id);
        }
    }
}

/// Serialize for diagnostics and the CLI
pub fn to_html(nodes: &[VNode]) -> String {
    let mut out = String::new();
    for node in nodes {
        write(&mut out, node);
    }
    out
}

fn write(out: &mut String, node: &VNode) {
    match node {
        VNode::Text(text) => out.push_str(&entities::escape(text, false)),
        VNode::Element(element) => {
            markup::write_open_tag(out, &element.tag, &element.attrs);
            if markup::is_void(&element.tag) {
                return;
            }
            for child in &element.children {
                write(out, child);
            }
            out.push_str("</");
            out.push_str(&element.tag);
            out.push('>');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::HostLoop;

    #[test]
    fn materialize_collects_handlers() {
        let doc = Document::new(HostLoop::new());
        let nodes = vec![VNode::Element(VElement {
            tag: "button".into(),
            attrs: vec![("id".into(), "btn-w1".into())],
            children: vec![VNode::Text("Go".into())],
            name: Some("btn".into()),
            index: None,
            handlers: vec![Handler {
                node: "btn".into(),
                event: "click".into(),
                action: HandlerAction::Script("go".into()),
            }],
        })];
        let mounted = materialize(&doc, doc.body(), &nodes);
        assert_eq!(mounted.len(), 1);
        assert_eq!(doc.get_element_by_id("btn-w1"), Some(mounted[0].node));
        assert_eq!(doc.inner_html(doc.body()), to_html(&nodes));
    }
}
