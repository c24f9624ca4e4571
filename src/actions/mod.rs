//! # Actions and their completion signals.
//!
//! - [`Action`]: immutable state-mutation request (wire-serializable)
//! - [`ActionCompletion`]: `Done` vs `Pending` result of routing/executing an action

mod action;
mod completion;

pub use action::{Action, ObserverId, State};
pub use completion::{ActionCompletion, ActionResult};
