//! Document - in-memory live document with browser-like semantics
//!
//! Nodes live in an arena addressed by [`NodeId`]. Ids are never reused, so a
//! `NodeId` doubles as node identity: a child component that was re-parented
//! keeps its id, a rebuilt one gets a new id.
//!
//! Semantics borrowed from the browser:
//! - event listeners run synchronously on dispatch, target first, then
//!   bubbling through ancestors
//! - mutation observers collect records for their target's subtree and get
//!   them delivered on a later host-loop turn; `take_records` discards the
//!   pending ones

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;
use serde::Serialize;
use smallvec::SmallVec;

use super::event::DomEvent;
use super::markup::{self, Markup};
use crate::error::Result;
use crate::runtime::HostLoop;

/// Arena index of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// What changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    Attributes { name: String },
    CharacterData,
    ChildList,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub kind: MutationKind,
    pub target: NodeId,
}

pub type ListenerFn = Rc<dyn Fn(&DomEvent)>;
pub type ObserverFn = Rc<dyn Fn(Vec<MutationRecord>)>;

#[derive(Debug, Clone)]
enum NodeKind {
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

struct Listener {
    node: NodeId,
    event: String,
    callback: ListenerFn,
}

struct Observer {
    target: NodeId,
    callback: ObserverFn,
    pending: Vec<MutationRecord>,
    scheduled: bool,
}

#[derive(Default)]
struct Tree {
    nodes: Vec<Option<Node>>,
    listeners: FxHashMap<ListenerId, Listener>,
    observers: FxHashMap<ObserverId, Observer>,
    next_listener: u64,
    next_observer: u64,
}

impl Tree {
    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0 as usize).and_then(Option::as_ref)
    }

    fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    fn alloc(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(Node {
            kind,
            parent: None,
            children: Vec::new(),
        }));
        id
    }

    /// Node followed by its ancestors
    fn ancestry(&self, id: NodeId) -> SmallVec<[NodeId; 16]> {
        let mut chain = SmallVec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            chain.push(node_id);
            current = self.node(node_id).and_then(|n| n.parent);
        }
        chain
    }

    fn detach(&mut self, id: NodeId) -> Option<NodeId> {
        let parent = self.node_mut(id)?.parent.take()?;
        if let Some(p) = self.node_mut(parent) {
            p.children.retain(|c| *c != id);
        }
        Some(parent)
    }

    /// Drop a detached subtree with its listeners and observers
    fn free(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(node) = self.nodes.get_mut(current.0 as usize).and_then(Option::take) {
                stack.extend(node.children);
            }
            self.listeners.retain(|_, l| l.node != current);
            self.observers.retain(|_, o| o.target != current);
        }
    }

    fn text_content(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.node(id) else { return };
        match &node.kind {
            NodeKind::Text(text) => out.push_str(text),
            NodeKind::Element { .. } => {
                for child in &node.children {
                    self.text_content(*child, out);
                }
            }
        }
    }

    fn to_markup(&self, id: NodeId) -> Option<Markup> {
        let node = self.node(id)?;
        Some(match &node.kind {
            NodeKind::Text(text) => Markup::Text(text.clone()),
            NodeKind::Element { tag, attrs } => Markup::Element {
                tag: tag.clone(),
                attrs: attrs.clone(),
                children: node
                    .children
                    .iter()
                    .filter_map(|c| self.to_markup(*c))
                    .collect(),
            },
        })
    }

    fn find_by_id(&self, scope: NodeId, wanted: &str) -> Option<NodeId> {
        let mut stack = vec![scope];
        while let Some(current) = stack.pop() {
            let node = self.node(current)?;
            if let NodeKind::Element { attrs, .. } = &node.kind {
                if attrs.iter().any(|(k, v)| k == "id" && v == wanted) {
                    return Some(current);
                }
            }
            // Reverse so the walk is in document order
            stack.extend(node.children.iter().rev().copied());
        }
        None
    }
}

/// Handle to a live document; clones share the same tree
#[derive(Clone)]
pub struct Document {
    tree: Rc<RefCell<Tree>>,
    host: HostLoop,
    body: NodeId,
}

impl Document {
    /// Create an empty document with a `<body>` root
    pub fn new(host: HostLoop) -> Self {
        let mut tree = Tree::default();
        let body = tree.alloc(NodeKind::Element {
            tag: "body".into(),
            attrs: Vec::new(),
        });
        Self {
            tree: Rc::new(RefCell::new(tree)),
            host,
            body,
        }
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn host(&self) -> &HostLoop {
        &self.host
    }

    // ═══════════════════════════════════════════
    // CONSTRUCTION / TREE SHAPE
    // ═══════════════════════════════════════════

    pub fn create_element(&self, tag: &str) -> NodeId {
        self.tree.borrow_mut().alloc(NodeKind::Element {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
        })
    }

    pub fn create_text(&self, text: &str) -> NodeId {
        self.tree.borrow_mut().alloc(NodeKind::Text(text.to_string()))
    }

    /// Whether the node exists (not freed)
    pub fn contains(&self, id: NodeId) -> bool {
        self.tree.borrow().node(id).is_some()
    }

    /// Whether the node is attached under `<body>`
    pub fn is_connected(&self, id: NodeId) -> bool {
        self.tree.borrow().ancestry(id).last() == Some(&self.body)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.tree.borrow().node(id).and_then(|n| n.parent)
    }

    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.tree
            .borrow()
            .node(id)
            .map(|n| n.children.clone())
            .unwrap_or_default()
    }

    pub fn tag(&self, id: NodeId) -> Option<String> {
        match &self.tree.borrow().node(id)?.kind {
            NodeKind::Element { tag, .. } => Some(tag.clone()),
            NodeKind::Text(_) => None,
        }
    }

    /// Move `child` (with its subtree) to the end of `parent`
    pub fn append_child(&self, parent: NodeId, child: NodeId) {
        let mut tree = self.tree.borrow_mut();
        if tree.node(parent).is_none() || tree.node(child).is_none() {
            return;
        }
        if let Some(old_parent) = tree.detach(child) {
            self.record(&mut tree, old_parent, MutationKind::ChildList);
        }
        if let Some(p) = tree.node_mut(parent) {
            p.children.push(child);
        }
        if let Some(c) = tree.node_mut(child) {
            c.parent = Some(parent);
        }
        self.record(&mut tree, parent, MutationKind::ChildList);
    }

    /// Unlink a node from its parent, keeping it (and its listeners) alive
    pub fn detach(&self, id: NodeId) {
        let mut tree = self.tree.borrow_mut();
        if let Some(parent) = tree.detach(id) {
            self.record(&mut tree, parent, MutationKind::ChildList);
        }
    }

    /// Unlink and free a node with its whole subtree
    pub fn remove(&self, id: NodeId) {
        let mut tree = self.tree.borrow_mut();
        if let Some(parent) = tree.detach(id) {
            self.record(&mut tree, parent, MutationKind::ChildList);
        }
        tree.free(id);
    }

    /// Free every child of `id`
    pub fn clear_children(&self, id: NodeId) {
        let mut tree = self.tree.borrow_mut();
        let Some(children) = tree.node_mut(id).map(|n| std::mem::take(&mut n.children)) else {
            return;
        };
        if children.is_empty() {
            return;
        }
        for child in children {
            if let Some(c) = tree.node_mut(child) {
                c.parent = None;
            }
            tree.free(child);
        }
        self.record(&mut tree, id, MutationKind::ChildList);
    }

    // ═══════════════════════════════════════════
    // ATTRIBUTES / CONTENT
    // ═══════════════════════════════════════════

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<String> {
        match &self.tree.borrow().node(id)?.kind {
            NodeKind::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone()),
            NodeKind::Text(_) => None,
        }
    }

    pub fn attributes(&self, id: NodeId) -> Vec<(String, String)> {
        match self.tree.borrow().node(id).map(|n| &n.kind) {
            Some(NodeKind::Element { attrs, .. }) => attrs.clone(),
            _ => Vec::new(),
        }
    }

    pub fn set_attribute(&self, id: NodeId, name: &str, value: &str) {
        let mut tree = self.tree.borrow_mut();
        let Some(NodeKind::Element { attrs, .. }) = tree.node_mut(id).map(|n| &mut n.kind) else {
            return;
        };
        match attrs.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value.to_string(),
            None => attrs.push((name.to_string(), value.to_string())),
        }
        self.record(
            &mut tree,
            id,
            MutationKind::Attributes {
                name: name.to_string(),
            },
        );
    }

    pub fn remove_attribute(&self, id: NodeId, name: &str) {
        let mut tree = self.tree.borrow_mut();
        let Some(NodeKind::Element { attrs, .. }) = tree.node_mut(id).map(|n| &mut n.kind) else {
            return;
        };
        let before = attrs.len();
        attrs.retain(|(k, _)| k != name);
        if attrs.len() != before {
            self.record(
                &mut tree,
                id,
                MutationKind::Attributes {
                    name: name.to_string(),
                },
            );
        }
    }

    pub fn text_content(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.tree.borrow().text_content(id, &mut out);
        out
    }

    /// Replace the node's text (text node) or its children with one text node
    pub fn set_text_content(&self, id: NodeId, text: &str) {
        let is_text = {
            let mut tree = self.tree.borrow_mut();
            match tree.node_mut(id).map(|n| &mut n.kind) {
                Some(NodeKind::Text(current)) => {
                    *current = text.to_string();
                    self.record(&mut tree, id, MutationKind::CharacterData);
                    true
                }
                Some(NodeKind::Element { .. }) => false,
                None => return,
            }
        };
        if !is_text {
            self.clear_children(id);
            if !text.is_empty() {
                let node = self.create_text(text);
                self.append_child(id, node);
            }
        }
    }

    pub fn inner_html(&self, id: NodeId) -> String {
        let tree = self.tree.borrow();
        let children: Vec<Markup> = tree
            .node(id)
            .map(|n| n.children.iter().filter_map(|c| tree.to_markup(*c)).collect())
            .unwrap_or_default();
        markup::to_html(&children)
    }

    pub fn outer_html(&self, id: NodeId) -> String {
        let tree = self.tree.borrow();
        tree.to_markup(id)
            .map(|m| markup::to_html(std::slice::from_ref(&m)))
            .unwrap_or_default()
    }

    /// Parse `html` and replace the node's children with it
    pub fn set_inner_html(&self, id: NodeId, html: &str) -> Result<()> {
        let nodes = markup::parse_fragment(html)?;
        self.clear_children(id);
        for node in &nodes {
            self.build(id, node);
        }
        Ok(())
    }

    /// Materialize parsed markup under `parent`, returning the new node
    pub fn build(&self, parent: NodeId, node: &Markup) -> NodeId {
        let id = match node {
            Markup::Text(text) => self.create_text(text),
            Markup::Element {
                tag,
                attrs,
                children,
            } => {
                let id = self.tree.borrow_mut().alloc(NodeKind::Element {
                    tag: tag.clone(),
                    attrs: attrs.clone(),
                });
                for child in children {
                    self.build(id, child);
                }
                id
            }
        };
        self.append_child(parent, id);
        id
    }

    // ═══════════════════════════════════════════
    // LOOKUP
    // ═══════════════════════════════════════════

    /// First element with `id` inside `scope` (inclusive), in document order
    pub fn find_in(&self, scope: NodeId, id: &str) -> Option<NodeId> {
        self.tree.borrow().find_by_id(scope, id)
    }

    /// First connected element with `id`
    pub fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        self.find_in(self.body, id)
    }

    // ═══════════════════════════════════════════
    // EVENTS
    // ═══════════════════════════════════════════

    pub fn add_event_listener(
        &self,
        node: NodeId,
        event: &str,
        callback: impl Fn(&DomEvent) + 'static,
    ) -> ListenerId {
        let mut tree = self.tree.borrow_mut();
        let id = ListenerId(tree.next_listener);
        tree.next_listener += 1;
        tree.listeners.insert(
            id,
            Listener {
                node,
                event: event.to_string(),
                callback: Rc::new(callback),
            },
        );
        id
    }

    pub fn remove_event_listener(&self, id: ListenerId) {
        self.tree.borrow_mut().listeners.remove(&id);
    }

    pub fn listener_count(&self, node: NodeId) -> usize {
        self.tree
            .borrow()
            .listeners
            .values()
            .filter(|l| l.node == node)
            .count()
    }

    /// Dispatch synchronously: listeners on the target, then on each ancestor.
    /// Returns how many listeners ran.
    pub fn dispatch_event(&self, target: NodeId, mut event: DomEvent) -> usize {
        event.target = Some(target);

        // Collect first: listeners may mutate the document while running
        let callbacks: Vec<ListenerFn> = {
            let tree = self.tree.borrow();
            let chain = tree.ancestry(target);
            let mut ordered: Vec<(usize, u64, ListenerFn)> = tree
                .listeners
                .iter()
                .filter(|(_, l)| l.event == event.kind)
                .filter_map(|(id, l)| {
                    let depth = chain.iter().position(|n| *n == l.node)?;
                    Some((depth, id.0, Rc::clone(&l.callback)))
                })
                .collect();
            ordered.sort_by_key(|(depth, id, _)| (*depth, *id));
            ordered.into_iter().map(|(_, _, cb)| cb).collect()
        };

        for callback in &callbacks {
            callback(&event);
        }
        callbacks.len()
    }

    // ═══════════════════════════════════════════
    // MUTATION OBSERVERS
    // ═══════════════════════════════════════════

    /// Observe attribute, text and child-list changes in `target`'s subtree
    pub fn observe(
        &self,
        target: NodeId,
        callback: impl Fn(Vec<MutationRecord>) + 'static,
    ) -> ObserverId {
        let mut tree = self.tree.borrow_mut();
        let id = ObserverId(tree.next_observer);
        tree.next_observer += 1;
        tree.observers.insert(
            id,
            Observer {
                target,
                callback: Rc::new(callback),
                pending: Vec::new(),
                scheduled: false,
            },
        );
        id
    }

    /// Stop observing; undelivered records are dropped
    pub fn disconnect(&self, id: ObserverId) {
        self.tree.borrow_mut().observers.remove(&id);
    }

    /// Remove and return records not yet delivered
    pub fn take_records(&self, id: ObserverId) -> Vec<MutationRecord> {
        self.tree
            .borrow_mut()
            .observers
            .get_mut(&id)
            .map(|o| std::mem::take(&mut o.pending))
            .unwrap_or_default()
    }

    pub fn observer_count(&self) -> usize {
        self.tree.borrow().observers.len()
    }

    fn record(&self, tree: &mut Tree, target: NodeId, kind: MutationKind) {
        let chain = tree.ancestry(target);
        let mut to_schedule: SmallVec<[ObserverId; 4]> = SmallVec::new();
        for (id, observer) in tree.observers.iter_mut() {
            if !chain.contains(&observer.target) {
                continue;
            }
            observer.pending.push(MutationRecord {
                kind: kind.clone(),
                target,
            });
            if !observer.scheduled {
                observer.scheduled = true;
                to_schedule.push(*id);
            }
        }
        for id in to_schedule {
            let weak: Weak<RefCell<Tree>> = Rc::downgrade(&self.tree);
            self.host.defer(move || deliver(&weak, id));
        }
    }
}

fn deliver(tree: &Weak<RefCell<Tree>>, id: ObserverId) {
    let Some(tree) = tree.upgrade() else { return };
    let delivery = {
        let mut tree = tree.borrow_mut();
        tree.observers.get_mut(&id).map(|o| {
            o.scheduled = false;
            (Rc::clone(&o.callback), std::mem::take(&mut o.pending))
        })
    };
    if let Some((callback, records)) = delivery {
        if !records.is_empty() {
            callback(records);
        }
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tree = self.tree.borrow();
        f.debug_struct("Document")
            .field("nodes", &tree.nodes.iter().filter(|n| n.is_some()).count())
            .field("listeners", &tree.listeners.len())
            .field("observers", &tree.observers.len())
            .finish()
    }
}
