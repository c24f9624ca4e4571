//! # Thunk lifecycle.
//!
//! - [`ThunkManager`]: registry, state machine, root tracking, deferred completion
//! - [`ThunkSpec`] / [`Thunk`]: registration request and record snapshot
//! - [`ThunkHandle`] / [`ThunkOutcome`]: waiting for a thunk's end
//!
//! Acknowledgement tracking lives in a private tracker owned by the manager.

mod manager;
mod thunk;
mod updates;

pub use manager::ThunkManager;
pub use thunk::{
    ActiveThunks, LockScope, Thunk, ThunkHandle, ThunkKind, ThunkOutcome, ThunkSpec, ThunkState,
    ThunkSummary,
};
