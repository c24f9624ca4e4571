//! Action middleware hooks.
//!
//! Middleware sees every routed action. `before_action` runs before the action
//! is executed or scheduled and may veto it; `after_action` observes the final
//! result. Hooks are synchronous and must not block.

use crate::actions::{Action, ActionResult};

/// Hook pair invoked around every routed action.
pub trait Middleware: Send + Sync + 'static {
    /// Name used in [`ActionError::Rejected`](crate::ActionError::Rejected) and logs.
    fn name(&self) -> &'static str;

    /// Returns `false` to reject the action.
    fn before_action(&self, _action: &Action) -> bool {
        true
    }

    /// Called once the action settled.
    fn after_action(&self, _action: &Action, _result: &ActionResult) {}
}
