//! Engine event log - audit trail of one view's activity
//!
//! - EngineEvent: tagged enum across 4 groups (lifecycle/model/script/diagnostic)
//! - Event: envelope with id + timestamp + kind
//! - EventLog: append-only log shared by clones of a handle
//!
//! Every non-fatal condition the engine degrades on lands here as well as in
//! `tracing`, so hosts and tests can inspect what was skipped.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Single entry in the log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence ID (for ordering)
    pub id: u64,
    /// Time since the log was created (ms)
    pub timestamp_ms: u64,
    /// Event type and data
    pub kind: EngineEvent,
}

/// What caused a full render
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cause", content = "path", rename_all = "snake_case")]
pub enum RenderCause {
    Initial,
    Changed(String),
    Deferred,
    Definition,
}

/// Who wrote to the model
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WriteSource {
    /// DOM→model attribute extraction
    Extraction,
    /// A script assignment to `data.*` / `model.*`
    Script,
}

/// All event types
///
/// Node and script names are `Arc<str>` so repeated entries share storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    // ═══════════════════════════════════════════
    // LIFECYCLE
    // ═══════════════════════════════════════════
    Initialized {
        view_id: Arc<str>,
        subscriptions: usize,
    },
    Rendered {
        view_id: Arc<str>,
        cause: RenderCause,
    },
    ChildrenMounted {
        node: Arc<str>,
        count: usize,
    },
    TemplateFailed {
        error: String,
    },
    Removed {
        view_id: Arc<str>,
    },

    // ═══════════════════════════════════════════
    // MODEL TRAFFIC
    // ═══════════════════════════════════════════
    ExtractionRan {
        node: Arc<str>,
    },
    ModelWritten {
        source: WriteSource,
        fields: Vec<String>,
    },
    ModelWriteFailed {
        fields: Vec<String>,
        error: String,
    },
    EventForwarded {
        node: Arc<str>,
        event: String,
        payload: Value,
    },

    // ═══════════════════════════════════════════
    // SCRIPTS
    // ═══════════════════════════════════════════
    ScriptRan {
        name: Arc<str>,
    },
    ScriptMissing {
        name: Arc<str>,
    },
    ScriptAborted {
        name: Arc<str>,
        reason: String,
    },

    // ═══════════════════════════════════════════
    // DIAGNOSTICS (degraded, non-fatal)
    // ═══════════════════════════════════════════
    NodeMissing {
        node: Arc<str>,
        purpose: String,
    },
    PatternMismatch {
        node: Arc<str>,
        attr: String,
        value: String,
    },
    PlaceholderMissing {
        node: Arc<str>,
        attr: String,
        field: String,
        value: String,
    },
    FieldUnresolved {
        node: Arc<str>,
        field: String,
    },
}

impl EngineEvent {
    /// Node the event concerns, if any
    pub fn node(&self) -> Option<&str> {
        match self {
            Self::ChildrenMounted { node, .. }
            | Self::ExtractionRan { node }
            | Self::EventForwarded { node, .. }
            | Self::NodeMissing { node, .. }
            | Self::PatternMismatch { node, .. }
            | Self::PlaceholderMissing { node, .. }
            | Self::FieldUnresolved { node, .. } => Some(node),
            _ => None,
        }
    }

    /// Check if this records degraded behavior
    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            Self::TemplateFailed { .. }
                | Self::ModelWriteFailed { .. }
                | Self::ScriptMissing { .. }
                | Self::ScriptAborted { .. }
                | Self::NodeMissing { .. }
                | Self::PatternMismatch { .. }
                | Self::PlaceholderMissing { .. }
                | Self::FieldUnresolved { .. }
        )
    }
}

/// Append-only event log
#[derive(Clone)]
pub struct EventLog {
    events: Arc<RwLock<Vec<Event>>>,
    start_time: Instant,
    next_id: Arc<AtomicU64>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(Vec::new())),
            start_time: Instant::now(),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append an event, returning its ID
    pub fn emit(&self, kind: EngineEvent) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            timestamp_ms: self.start_time.elapsed().as_millis() as u64,
            kind,
        };

        self.events.write().push(event);
        id
    }

    /// Get all events (cloned)
    pub fn events(&self) -> Vec<Event> {
        self.events.read().clone()
    }

    /// Count events matching a predicate without cloning the log
    pub fn count(&self, pred: impl Fn(&EngineEvent) -> bool) -> usize {
        self.events.read().iter().filter(|e| pred(&e.kind)).count()
    }

    /// Events concerning one node
    pub fn filter_node(&self, node: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.node() == Some(node))
            .collect()
    }

    /// Degraded-behavior events only
    pub fn warnings(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.kind.is_warning())
            .collect()
    }

    /// Serialize to JSON for debugging
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self.events()).unwrap_or(Value::Null)
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ═══════════════════════════════════════════════════════════════
    // EngineEvent tests
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn node_extraction() {
        let missing = EngineEvent::NodeMissing {
            node: "btn".into(),
            purpose: "event listener".into(),
        };
        assert_eq!(missing.node(), Some("btn"));

        let rendered = EngineEvent::Rendered {
            view_id: "w1".into(),
            cause: RenderCause::Initial,
        };
        assert_eq!(rendered.node(), None);
    }

    #[test]
    fn warnings_are_classified() {
        assert!(EngineEvent::ScriptMissing { name: "x".into() }.is_warning());
        assert!(!EngineEvent::ScriptRan { name: "x".into() }.is_warning());
    }

    #[test]
    fn serializes_with_type_tag() {
        let kind = EngineEvent::EventForwarded {
            node: "btn".into(),
            event: "click".into(),
            payload: json!({"type": "click"}),
        };

        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["type"], "event_forwarded");
        assert_eq!(value["node"], "btn");
        assert_eq!(value["payload"]["type"], "click");
    }

    #[test]
    fn render_cause_round_trips() {
        let kind = EngineEvent::Rendered {
            view_id: "w1".into(),
            cause: RenderCause::Changed("name".into()),
        };
        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["cause"]["cause"], "changed");
        assert_eq!(value["cause"]["path"], "name");
        let back: EngineEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back, kind);
    }

    // ═══════════════════════════════════════════════════════════════
    // EventLog tests
    // ═══════════════════════════════════════════════════════════════

    #[test]
    fn emit_returns_monotonic_ids() {
        let log = EventLog::new();
        let a = log.emit(EngineEvent::ScriptRan { name: "a".into() });
        let b = log.emit(EngineEvent::ScriptRan { name: "b".into() });
        assert_eq!((a, b), (0, 1));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn filters_by_node_and_warning() {
        let log = EventLog::new();
        log.emit(EngineEvent::ExtractionRan { node: "a".into() });
        log.emit(EngineEvent::PatternMismatch {
            node: "a".into(),
            attr: "value".into(),
            value: "zzz".into(),
        });
        log.emit(EngineEvent::ExtractionRan { node: "b".into() });

        assert_eq!(log.filter_node("a").len(), 2);
        assert_eq!(log.warnings().len(), 1);
        assert_eq!(
            log.count(|k| matches!(k, EngineEvent::ExtractionRan { .. })),
            2
        );
    }

    #[test]
    fn clones_share_storage() {
        let log = EventLog::new();
        let cloned = log.clone();
        log.emit(EngineEvent::ScriptMissing { name: "x".into() });
        assert_eq!(cloned.len(), 1);
    }
}
