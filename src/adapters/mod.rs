//! # External collaborator contracts.
//!
//! The bridge core is transport- and container-agnostic. Hosts plug in:
//! - a [`StateAdapter`] for the authoritative state container,
//! - an [`ObserverTransport`] for pushing updates to observers,
//! - a [`BatchTransport`] on the submission side.

mod state;
mod transport;

pub use state::{Applied, StateAdapter, StateListener, Unsubscribe};
pub use transport::{BatchTransport, ObserverTransport};
