//! Runtime Module - the live side of the engine
//!
//! - `host`: cooperative FIFO task queue standing in for the host event loop
//! - `guard`: reentrancy flag held while the engine writes DOM or model
//! - `view`: the DOM sync controller composing templates, bindings, the
//!   model walker and scripts
//!
//! This module is the "when": everything here reacts to notifications.
//! For the static side (templates, bindings), see `template` and `binding`.

pub mod guard;
pub mod host;
pub mod view;

pub use guard::{GuardToken, ReentrancyGuard};
pub use host::HostLoop;
pub use view::{ChildModel, ChildView, ChildViewBuilder, LiveBindings, View};
