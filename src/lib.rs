//! Tessera - reactive template binding engine for HTML widgets
//!
//! A widget is a YAML definition: an HTML template with `${...}` placeholders
//! plus declarative bindings. A [`View`] renders it into a [`Document`] and
//! keeps the document and an external [`DataModel`] in sync both ways.
//!
//! ```text
//! widget.yaml ─► WidgetDefinition ─► template::compile ─► BindingRegistry
//!                                                              │
//!   DataModel ◄──── set_batch / emit_event ──── View ◄─────────┘
//!       │                                        ▲ │
//!       └── subscribe (model::walker) ───────────┘ └─► Document (observers,
//!                                                       listeners, scripts)
//! ```

pub mod binding;
pub mod config;
pub mod dom;
pub mod error;
pub mod event;
pub mod model;
pub mod runtime;
pub mod script;
pub mod template;
pub mod util;
pub mod widget;

pub use binding::{BindingRegistry, TokenPattern};
pub use config::EngineConfig;
pub use dom::{Document, DomEvent, EventSerializer, NodeId, PlainSerializer};
pub use error::{FixSuggestion, Result, TesseraError};
pub use event::{EngineEvent, EventLog};
pub use model::{DataModel, MemoryModel, OutboundEvent};
pub use runtime::{ChildView, ChildViewBuilder, HostLoop, View};
pub use script::ScriptHost;
pub use template::CompiledTemplate;
pub use widget::WidgetDefinition;
