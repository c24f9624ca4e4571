//! # Deferred completion of an action.
//!
//! Whether an action settled synchronously or will settle later is a
//! type-level decision: [`ActionCompletion::Done`] carries the final result,
//! [`ActionCompletion::Pending`] carries a future that resolves to it.
//!
//! ```rust
//! use bridgevisor::ActionCompletion;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let done = ActionCompletion::Done(Ok(()));
//! assert!(done.is_sync());
//! assert!(done.settle().await.is_ok());
//! # }
//! ```

use std::fmt;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::oneshot;

use crate::error::ActionError;

/// Result of a single action.
pub type ActionResult = Result<(), ActionError>;

/// Completion signal returned by the router and the executor.
pub enum ActionCompletion {
    /// The state was already updated (or the action already failed) when the call returned.
    Done(ActionResult),
    /// The action settles later.
    Pending(BoxFuture<'static, ActionResult>),
}

impl ActionCompletion {
    /// True when the action settled before the call returned.
    pub fn is_sync(&self) -> bool {
        matches!(self, ActionCompletion::Done(_))
    }

    /// Waits for the final result.
    pub async fn settle(self) -> ActionResult {
        match self {
            ActionCompletion::Done(res) => res,
            ActionCompletion::Pending(fut) => fut.await,
        }
    }

    /// Builds a pending completion fed by a oneshot channel.
    ///
    /// A dropped sender means the action never ran: it resolves as
    /// [`ActionError::Canceled`].
    pub fn from_receiver(rx: oneshot::Receiver<ActionResult>, action_id: impl Into<String>) -> Self {
        let action_id = action_id.into();
        ActionCompletion::Pending(
            async move { rx.await.unwrap_or(Err(ActionError::Canceled { action_id })) }.boxed(),
        )
    }
}

impl fmt::Debug for ActionCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionCompletion::Done(res) => f.debug_tuple("Done").field(res).finish(),
            ActionCompletion::Pending(_) => f.write_str("Pending(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropped_sender_settles_as_canceled() {
        let (tx, rx) = oneshot::channel();
        let completion = ActionCompletion::from_receiver(rx, "a1");
        assert!(!completion.is_sync());
        drop(tx);
        assert_eq!(
            completion.settle().await,
            Err(ActionError::Canceled {
                action_id: "a1".into()
            })
        );
    }
}
