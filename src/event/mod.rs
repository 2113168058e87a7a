//! Event Module - per-view activity log
//!
//! - `log`: EngineEvent, EventLog

pub mod log;

pub use log::{EngineEvent, Event, EventLog, RenderCause, WriteSource};
