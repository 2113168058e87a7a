//! MemoryModel - in-process DataModel over a JSON tree
//!
//! Notifications fire synchronously from `set_batch`, after the write is
//! committed and every internal borrow is released, so subscribers may read
//! or write the model again.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use super::{ChangeCallback, DataModel, OutboundEvent, SubscriptionId};
use crate::error::Result;
use crate::util::jsonpath;

pub struct MemoryModel {
    root: RefCell<Value>,
    subscriptions: RefCell<BTreeMap<SubscriptionId, (String, ChangeCallback)>>,
    next_id: Cell<u64>,
    events: RefCell<Vec<OutboundEvent>>,
    writes: Cell<usize>,
}

impl MemoryModel {
    pub fn new(root: Value) -> Self {
        Self {
            root: RefCell::new(root),
            subscriptions: RefCell::new(BTreeMap::new()),
            next_id: Cell::new(0),
            events: RefCell::new(Vec::new()),
            writes: Cell::new(0),
        }
    }

    /// Shorthand for `set_batch` with one change
    pub fn set(&self, path: &str, value: Value) -> Result<()> {
        self.set_batch(vec![(path.to_string(), value)])
    }

    /// Full copy of the root
    pub fn snapshot(&self) -> Value {
        self.root.borrow().clone()
    }

    /// Outbound events emitted so far
    pub fn events(&self) -> Vec<OutboundEvent> {
        self.events.borrow().clone()
    }

    pub fn take_events(&self) -> Vec<OutboundEvent> {
        std::mem::take(&mut *self.events.borrow_mut())
    }

    /// Number of successful `set_batch` calls
    pub fn write_count(&self) -> usize {
        self.writes.get()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.borrow().len()
    }
}

impl Default for MemoryModel {
    fn default() -> Self {
        Self::new(Value::Object(Default::default()))
    }
}

impl DataModel for MemoryModel {
    fn get(&self, path: &str) -> Option<Value> {
        jsonpath::resolve(&self.root.borrow(), path).cloned()
    }

    fn keys(&self, path: &str) -> Vec<String> {
        match jsonpath::resolve(&self.root.borrow(), path) {
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    fn is_node(&self, path: &str) -> bool {
        matches!(
            jsonpath::resolve(&self.root.borrow(), path),
            Some(Value::Object(_))
        )
    }

    fn subscribe(&self, path: &str, callback: ChangeCallback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.subscriptions
            .borrow_mut()
            .insert(id, (path.to_string(), callback));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.subscriptions.borrow_mut().remove(&id);
    }

    /// Subscriptions at or below a changed path are notified, and so is a
    /// leaf (non-object) subscription the change lies inside, such as an
    /// array whose element was written. Object ancestors are not notified.
    fn set_batch(&self, changes: Vec<(String, Value)>) -> Result<()> {
        // Stage on a copy so a failing change leaves the model untouched
        let mut staged = self.root.borrow().clone();
        let mut changed = Vec::with_capacity(changes.len());
        for (path, value) in changes {
            let segments = jsonpath::parse(&path)?;
            let previous = jsonpath::set(&mut staged, &segments, value.clone())?;
            if previous.as_ref() != Some(&value) {
                changed.push(path);
            }
        }
        *self.root.borrow_mut() = staged;
        self.writes.set(self.writes.get() + 1);
        debug!(changed = changed.len(), "Model batch applied");

        for path in &changed {
            let targets: Vec<(String, ChangeCallback)> = self
                .subscriptions
                .borrow()
                .values()
                .filter(|(sub, _)| {
                    jsonpath::within(sub, path) || (jsonpath::within(path, sub) && !self.is_node(sub))
                })
                .map(|(sub, cb)| (sub.clone(), cb.clone()))
                .collect();
            for (sub, callback) in targets {
                let value = self.get(&sub).unwrap_or(Value::Null);
                callback(&sub, &value);
            }
        }
        Ok(())
    }

    fn emit_event(&self, event: OutboundEvent) {
        debug!(node = %event.node, event = %event.event, "Outbound event");
        self.events.borrow_mut().push(event);
    }
}

impl std::fmt::Debug for MemoryModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryModel")
            .field("root", &self.root.borrow())
            .field("subscriptions", &self.subscription_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::rc::Rc;

    fn recorder(model: &MemoryModel, path: &str) -> Rc<RefCell<Vec<Value>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        model.subscribe(path, Rc::new(move |_, v| s.borrow_mut().push(v.clone())));
        seen
    }

    #[test]
    fn notifies_exact_path_and_descendants() {
        let model = MemoryModel::new(json!({"data": {"a": {"b": 1}, "c": 2}}));
        let ab = recorder(&model, "data.a.b");
        let c = recorder(&model, "data.c");
        let data = recorder(&model, "data");

        model.set("data.a", json!({"b": 5})).unwrap();
        assert_eq!(*ab.borrow(), vec![json!(5)]);
        assert!(c.borrow().is_empty());
        // Ancestors are not notified
        assert!(data.borrow().is_empty());
    }

    #[test]
    fn write_inside_array_leaf_notifies_the_leaf() {
        let model = MemoryModel::new(json!({"data": {"rows": [{"label": "a"}], "n": 1}}));
        let rows = recorder(&model, "data.rows");
        let n = recorder(&model, "data.n");
        let data = recorder(&model, "data");

        model.set("data.rows.0.label", json!("z")).unwrap();
        assert_eq!(*rows.borrow(), vec![json!([{"label": "z"}])]);
        assert!(n.borrow().is_empty());
        assert!(data.borrow().is_empty());
    }

    #[test]
    fn unchanged_value_does_not_notify() {
        let model = MemoryModel::new(json!({"data": {"x": 1}}));
        let x = recorder(&model, "data.x");
        model.set("data.x", json!(1)).unwrap();
        assert!(x.borrow().is_empty());
        assert_eq!(model.write_count(), 1);
    }

    #[test]
    fn failed_batch_is_atomic() {
        let model = MemoryModel::new(json!({"data": {"x": 1, "s": "str"}}));
        let x = recorder(&model, "data.x");
        let err = model
            .set_batch(vec![
                ("data.x".into(), json!(2)),
                ("data.s.inner".into(), json!(3)),
            ])
            .unwrap_err();
        assert!(err.to_string().contains("TSR-031"));
        assert_eq!(model.get("data.x"), Some(json!(1)));
        assert!(x.borrow().is_empty());
    }

    #[test]
    fn graph_queries() {
        let model = MemoryModel::new(json!({"data": {"a": {"b": 1}, "list": [1, 2]}}));
        assert_eq!(model.keys("data"), vec!["a".to_string(), "list".to_string()]);
        assert!(model.is_node("data.a"));
        assert!(!model.is_node("data.list"));
        assert!(model.keys("data.list").is_empty());
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let model = MemoryModel::default();
        let seen = Rc::new(Cell::new(0));
        let s = Rc::clone(&seen);
        let id = model.subscribe("x", Rc::new(move |_, _| s.set(s.get() + 1)));
        model.set("x", json!(1)).unwrap();
        model.unsubscribe(id);
        model.set("x", json!(2)).unwrap();
        assert_eq!(seen.get(), 1);
    }
}
