//! Bridge events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to lifecycle events emitted by the lock manager,
//! scheduler, thunk manager, router and resource manager.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: every core component, plus listener workers (overflow/panic).
//! - **Consumers**: the bridge listener loop, which fans out to the
//!   [`ListenerSet`](crate::ListenerSet).

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
