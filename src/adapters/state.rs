//! # State container adapter contract.
//!
//! The bridge never touches application state directly. A [`StateAdapter`]
//! wraps whatever container the host uses (reducer store, plain mutable store)
//! behind a `get/subscribe/process` contract.
//!
//! Adapters report synchronous vs asynchronous application through [`Applied`]:
//! ```text
//! process_action(a) ─► Ok(Applied::Sync)        state already updated
//!                   ─► Ok(Applied::Async(fut))  state updates when `fut` resolves
//!                   ─► Err(e)                   rejected synchronously
//! ```

use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::actions::{Action, State};

/// Change listener registered with [`StateAdapter::subscribe`]; receives the new state.
pub type StateListener = Arc<dyn Fn(&State) + Send + Sync>;

/// How an adapter applied an action.
pub enum Applied {
    /// State was updated before `process_action` returned.
    Sync,
    /// State updates when the future resolves.
    Async(BoxFuture<'static, anyhow::Result<()>>),
}

impl fmt::Debug for Applied {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Applied::Sync => f.write_str("Sync"),
            Applied::Async(_) => f.write_str("Async(..)"),
        }
    }
}

/// Handle returned by [`StateAdapter::subscribe`]. Calling [`Unsubscribe::call`]
/// removes the listener; dropping the handle keeps it registered.
pub struct Unsubscribe(Option<Box<dyn FnOnce() + Send>>);

impl Unsubscribe {
    /// Wraps a removal closure.
    pub fn new(f: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(f)))
    }

    /// A handle that does nothing.
    pub fn noop() -> Self {
        Self(None)
    }

    /// Removes the listener.
    pub fn call(mut self) {
        if let Some(f) = self.0.take() {
            f();
        }
    }
}

/// Contract for the authoritative state container.
pub trait StateAdapter: Send + Sync + 'static {
    /// Short adapter name carried in [`ActionError::Processing`](crate::ActionError::Processing).
    fn kind(&self) -> &'static str;

    /// Returns a snapshot of the current state.
    fn get_state(&self) -> State;

    /// Registers a change listener.
    ///
    /// Listeners fired synchronously from inside `process_action` let the
    /// bridge attribute the change to the action's thunk.
    fn subscribe(&self, listener: StateListener) -> Unsubscribe;

    /// Applies one action.
    fn process_action(&self, action: &Action) -> anyhow::Result<Applied>;
}
