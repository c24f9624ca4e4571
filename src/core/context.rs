use std::sync::Arc;

use super::bridge::Bridge;
use crate::actions::{Action, ActionCompletion, ObserverId, State};
use crate::error::BridgeError;
use crate::thunks::{ThunkOutcome, ThunkSpec};

/// Handle passed to a thunk body by [`Bridge::run_thunk`].
///
/// Every action dispatched through it belongs to the thunk.
#[derive(Clone)]
pub struct ThunkContext {
    bridge: Arc<Bridge>,
    thunk_id: String,
    source: ObserverId,
}

impl ThunkContext {
    pub(super) fn new(bridge: Arc<Bridge>, thunk_id: String, source: ObserverId) -> Self {
        Self {
            bridge,
            thunk_id,
            source,
        }
    }

    pub fn thunk_id(&self) -> &str {
        &self.thunk_id
    }

    /// Observer the thunk was started for.
    pub fn source(&self) -> ObserverId {
        self.source
    }

    /// Routes `action` on behalf of this thunk.
    pub fn dispatch(&self, action: Action) -> Result<ActionCompletion, BridgeError> {
        self.bridge
            .enqueue_action(action, self.source, Some(&self.thunk_id))
    }

    pub fn get_state(&self) -> State {
        self.bridge.get_state()
    }

    /// Runs a nested thunk under this one. Its id is `spec.id`; the parent is set here.
    pub async fn run_child<F, Fut>(&self, spec: ThunkSpec, body: F) -> Result<ThunkOutcome, BridgeError>
    where
        F: FnOnce(ThunkContext) -> Fut,
        Fut: Future<Output = anyhow::Result<Option<State>>>,
    {
        self.bridge
            .run_thunk(spec.with_parent(self.thunk_id.clone()), body)
            .await
    }
}
