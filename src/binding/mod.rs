//! Binding Module - how live nodes map onto model fields
//!
//! - `pattern`: token patterns (`item-{row}-{col}`) that read model fields
//!   back out of live attribute values
//! - `registry`: the declarative bindings of one widget, per named node
//!
//! Data flow:
//! ```text
//! WidgetDefinition (attrs / events / children / looped / scripts)
//!            +  CompiledTemplate (callback handlers, node names)
//!                          ↓
//!                  BindingRegistry::build
//!                          ↓
//!          runtime::view materializes LiveBindings
//! ```

pub mod pattern;
pub mod registry;

pub use pattern::{coerce, extract, placeholders, Extracted, TokenPattern};
pub use registry::{
    AttrBinding, BindingRegistry, CallbackBinding, ChildrenBinding, EventBinding, ScriptBinding,
    ScriptTrigger,
};
