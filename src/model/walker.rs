//! Signal graph walker - subscribe to every leaf and sub-node of a model
//!
//! The model is walked once: each named leaf and each named sub-node below
//! the root gets a subscription, recursively. Handles are kept in one arena
//! and released together by [`SubscriptionSet::disconnect_all`] (or on drop).
//! Keys added after the walk are not subscribed until the next walk.

use std::rc::Rc;

use serde_json::Value;
use tracing::debug;

use super::{DataModel, SubscriptionId};
use crate::util::jsonpath;

/// Receives the changed path, relative to the walked root, and its new value
pub type WalkCallback = Rc<dyn Fn(&str, &Value)>;

pub struct SubscriptionSet {
    model: Rc<dyn DataModel>,
    handles: Vec<(String, SubscriptionId)>,
}

impl SubscriptionSet {
    /// Subscribe below `root`, reporting paths relative to it
    pub fn walk(model: Rc<dyn DataModel>, root: &str, on_change: WalkCallback) -> Self {
        let mut set = Self {
            model,
            handles: Vec::new(),
        };
        set.visit(root, "", &on_change);
        debug!(root = %root, subscriptions = set.handles.len(), "Model walked");
        set
    }

    fn visit(&mut self, root: &str, relative: &str, on_change: &WalkCallback) {
        let absolute = jsonpath::join(root, relative);
        for key in self.model.keys(&absolute) {
            let rel = jsonpath::join(relative, &key);
            let full = jsonpath::join(root, &rel);

            let cb = Rc::clone(on_change);
            let reported = rel.clone();
            let id = self
                .model
                .subscribe(&full, Rc::new(move |_, value| cb(&reported, value)));
            self.handles.push((rel.clone(), id));

            if self.model.is_node(&full) {
                self.visit(root, &rel, on_change);
            }
        }
    }

    /// Relative paths currently subscribed, in walk order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.handles.iter().map(|(p, _)| p.as_str())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Release every subscription
    pub fn disconnect_all(&mut self) {
        for (_, id) in self.handles.drain(..) {
            self.model.unsubscribe(id);
        }
    }
}

impl Drop for SubscriptionSet {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}

impl std::fmt::Debug for SubscriptionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionSet")
            .field("handles", &self.handles.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MemoryModel;
    use serde_json::json;
    use std::cell::RefCell;

    #[test]
    fn walks_nested_nodes_and_reports_relative_paths() {
        let model = Rc::new(MemoryModel::new(json!({
            "data": {"name": "A", "style": {"color": "red", "size": 2}, "rows": [1]}
        })));
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        let set = SubscriptionSet::walk(
            model.clone(),
            "data",
            Rc::new(move |path, value| s.borrow_mut().push((path.to_string(), value.clone()))),
        );

        let mut paths: Vec<&str> = set.paths().collect();
        paths.sort_unstable();
        assert_eq!(paths, vec!["name", "rows", "style", "style.color", "style.size"]);

        model.set("data.style.color", json!("blue")).unwrap();
        assert_eq!(*seen.borrow(), vec![("style.color".to_string(), json!("blue"))]);
    }

    #[test]
    fn disconnect_all_releases_every_handle() {
        let model = Rc::new(MemoryModel::new(json!({"data": {"a": 1, "b": {"c": 2}}})));
        let mut set = SubscriptionSet::walk(model.clone(), "data", Rc::new(|_, _| {}));
        assert_eq!(model.subscription_count(), 3);
        set.disconnect_all();
        assert!(set.is_empty());
        assert_eq!(model.subscription_count(), 0);
    }

    #[test]
    fn drop_disconnects() {
        let model = Rc::new(MemoryModel::new(json!({"data": {"a": 1}})));
        {
            let _set = SubscriptionSet::walk(model.clone(), "data", Rc::new(|_, _| {}));
            assert_eq!(model.subscription_count(), 1);
        }
        assert_eq!(model.subscription_count(), 0);
    }
}
