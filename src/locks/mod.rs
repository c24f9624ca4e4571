//! # Key-based locking.
//!
//! - [`LockManager`]: registry of active entries and conflict oracle
//! - [`LockEntry`]: one entry (`keys = None` is global)
//! - [`paths_overlap`] / [`scopes_overlap`]: dotted-path overlap rules

mod keys;
mod manager;

pub use keys::{paths_overlap, scopes_overlap};
pub use manager::{LockEntry, LockManager};
