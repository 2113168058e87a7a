//! Live document - arena-backed DOM with browser-like semantics
//!
//! - `document`: nodes, attributes, listeners, mutation observers
//! - `event`: DOM events and their serialization
//! - `markup`: HTML fragment parsing (html5gum) and serialization

pub mod document;
pub mod event;
pub mod markup;

pub use document::{Document, ListenerId, MutationKind, MutationRecord, NodeId, ObserverId};
pub use event::{DomEvent, EventSerializer, PlainSerializer};
pub use markup::{parse_fragment, to_html, Markup};
