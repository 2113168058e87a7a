//! DOM events and their serialization
//!
//! Events dispatched on the document are projected into plain JSON maps before
//! they leave the engine as outbound model events.

use serde::Serialize;
use serde_json::{Map, Value};

use super::document::{Document, NodeId};

/// A native event as dispatched on the document
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DomEvent {
    /// Event name ("click", "change", ...)
    pub kind: String,
    /// Set by `Document::dispatch_event`
    pub target: Option<NodeId>,
    /// Event-specific properties (key, button, clientX, ...)
    pub detail: Map<String, Value>,
}

impl DomEvent {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            target: None,
            detail: Map::new(),
        }
    }

    /// Builder-style detail property
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.detail.insert(key.into(), value.into());
        self
    }
}

/// Projects a native event into a plain attribute map
pub trait EventSerializer {
    fn serialize(&self, event: &DomEvent, document: &Document) -> Map<String, Value>;
}

/// Default projection: `type`, every detail property, and a `target` object
/// holding the target's id, `value` and `checked` attributes when present
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainSerializer;

impl EventSerializer for PlainSerializer {
    fn serialize(&self, event: &DomEvent, document: &Document) -> Map<String, Value> {
        let mut out = event.detail.clone();
        out.insert("type".into(), Value::String(event.kind.clone()));

        if let Some(target) = event.target.filter(|t| document.contains(*t)) {
            let mut projected = Map::new();
            for name in ["id", "value", "checked"] {
                if let Some(value) = document.attribute(target, name) {
                    projected.insert(name.into(), Value::String(value));
                }
            }
            if !projected.is_empty() {
                out.insert("target".into(), Value::Object(projected));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::HostLoop;
    use serde_json::json;

    #[test]
    fn builder_collects_detail() {
        let event = DomEvent::new("keydown").with("key", "Enter").with("repeat", false);
        assert_eq!(event.detail["key"], json!("Enter"));
        assert_eq!(event.detail["repeat"], json!(false));
    }

    #[test]
    fn plain_serializer_projects_target() {
        let doc = Document::new(HostLoop::new());
        let input = doc.create_element("input");
        doc.set_attribute(input, "id", "entry-w1");
        doc.set_attribute(input, "value", "42");

        let mut event = DomEvent::new("change").with("bubbles", true);
        event.target = Some(input);

        let out = PlainSerializer.serialize(&event, &doc);
        assert_eq!(out["type"], json!("change"));
        assert_eq!(out["bubbles"], json!(true));
        assert_eq!(out["target"], json!({"id": "entry-w1", "value": "42"}));
    }
}
