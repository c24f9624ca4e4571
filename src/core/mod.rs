//! Runtime core: wiring and host API.
//!
//! The only public API from this module is [`Bridge`] (built by
//! [`BridgeBuilder`]) and the [`ThunkContext`] handed to thunk bodies.
//!
//! Internal modules:
//! - [`bridge`]: owns every component, diffs state changes, runs maintenance;
//! - [`builder`]: constructs components in dependency order and starts loops;
//! - [`context`]: per-thunk dispatch handle.

mod bridge;
mod builder;
mod context;

pub use bridge::{Bridge, MaintenanceReport, STATE_UPDATE_CHANNEL};
pub use builder::BridgeBuilder;
pub use context::ThunkContext;
