//! Model Module - the observable data store a view binds to
//!
//! - `DataModel`: the contract the engine needs (read, batch write,
//!   subscribe, outbound events)
//! - `memory`: in-process implementation used by the CLI and tests
//! - `walker`: recursive subscription over a nested model
//!
//! Paths are dotted (`data.rows.0.name`). A view's fields live under the
//! `data` sub-object of the model root.

mod memory;
pub mod walker;

use std::rc::Rc;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::Result;

pub use memory::MemoryModel;
pub use walker::SubscriptionSet;

/// Handle returned by [`DataModel::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Called with the subscribed path and its new value
pub type ChangeCallback = Rc<dyn Fn(&str, &Value)>;

/// Event leaving the engine towards whoever owns the model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutboundEvent {
    /// Node name the event was bound on
    pub node: String,
    pub event: String,
    /// Serialized DOM event
    pub data: Map<String, Value>,
}

/// Externally owned, observable key/value store
pub trait DataModel {
    /// Value at `path` ("" is the root)
    fn get(&self, path: &str) -> Option<Value>;

    /// Names below `path` when it is a node, empty otherwise
    fn keys(&self, path: &str) -> Vec<String>;

    /// Whether `path` holds named children (sub-node) rather than a leaf
    fn is_node(&self, path: &str) -> bool;

    fn subscribe(&self, path: &str, callback: ChangeCallback) -> SubscriptionId;

    fn unsubscribe(&self, id: SubscriptionId);

    /// Apply all changes or none
    fn set_batch(&self, changes: Vec<(String, Value)>) -> Result<()>;

    fn emit_event(&self, event: OutboundEvent);
}
