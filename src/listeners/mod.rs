//! # Telemetry listeners.
//!
//! This module provides the [`Listener`] trait and the [`ListenerSet`] that
//! fans bus events out to registered listeners. It is the narrow callback
//! surface an external debugging sidecar plugs into; nothing here sits in a
//! correctness path.
//!
//! ```text
//! Bus ──► bridge listener loop ──► ListenerSet::emit(&Event)
//!                                     ├──► TransactionTracker
//!                                     ├──► LogWriter (feature = "logging")
//!                                     └──► sidecar / metrics / custom
//! ```

mod embedded;
mod listener;
mod set;

pub use embedded::{Transaction, TransactionLatency, TransactionTracker};
pub use listener::Listener;
pub use set::{ListenerId, ListenerSet};

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
