//! # LogWriter: tracing-backed event printer
//!
//! A minimal listener that renders incoming [`Event`]s through `tracing`.
//! Use it for tests, demos, or as a starting point for a telemetry sidecar.
//!
//! ## Example output
//! ```text
//! DEBUG bridgevisor: [thunk-registered] thunk="t1" observer=Some(2)
//! DEBUG bridgevisor: [task-started] task="a1" thunk="t1"
//! DEBUG bridgevisor: [lock-released] thunk="t1"
//!  WARN bridgevisor: [observer-evicted] observer=Some(7)
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::listeners::Listener;

/// Event writer listener.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Listener for LogWriter {
    async fn on_event(&self, e: &Event) {
        let thunk = e.thunk.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::ThunkRegistered => {
                tracing::debug!("[thunk-registered] thunk={thunk:?} observer={:?}", e.observer);
            }
            EventKind::ThunkStarted => tracing::debug!("[thunk-started] thunk={thunk:?}"),
            EventKind::ThunkCompleted => {
                tracing::debug!("[thunk-completed] thunk={thunk:?} took_ms={:?}", e.duration_ms);
            }
            EventKind::ThunkFailed => {
                tracing::debug!("[thunk-failed] thunk={thunk:?} err={:?}", e.reason);
            }
            EventKind::ThunkEvicted => tracing::debug!("[thunk-evicted] thunk={thunk:?}"),
            EventKind::RootChanged => tracing::debug!("[root-changed] root={:?}", e.thunk),
            EventKind::TaskQueued | EventKind::TaskStarted | EventKind::TaskCompleted => {
                tracing::debug!("[{:?}] task={:?} thunk={thunk:?}", e.kind, e.task);
            }
            EventKind::TaskFailed => {
                tracing::debug!("[task-failed] task={:?} thunk={thunk:?} err={:?}", e.task, e.reason);
            }
            EventKind::TasksRemoved => {
                tracing::debug!("[tasks-removed] thunk={thunk:?} count={:?}", e.count);
            }
            EventKind::LockAcquired => tracing::debug!("[lock-acquired] thunk={thunk:?}"),
            EventKind::LockReleased => tracing::debug!("[lock-released] thunk={thunk:?}"),
            EventKind::ActionDispatched => {
                tracing::debug!(
                    "[action-dispatched] action={:?} batch={:?} count={:?} observer={:?}",
                    e.action,
                    e.reason,
                    e.count,
                    e.observer
                );
            }
            EventKind::ActionReceived | EventKind::ActionApplied => {
                tracing::debug!(
                    "[{:?}] action={:?} type={:?} thunk={thunk:?}",
                    e.kind,
                    e.action,
                    e.action_type
                );
            }
            EventKind::ActionFailed => {
                tracing::debug!(
                    "[action-failed] action={:?} type={:?} err={:?}",
                    e.action,
                    e.action_type,
                    e.reason
                );
            }
            EventKind::StateUpdateSent
            | EventKind::StateUpdateAcknowledged
            | EventKind::StateUpdateExpired => {
                tracing::debug!("[{:?}] update={:?} observer={:?}", e.kind, e.update, e.observer);
            }
            EventKind::ObserverEvicted => {
                tracing::warn!("[observer-evicted] observer={:?}", e.observer);
            }
            EventKind::ObserverRemoved => {
                tracing::debug!("[observer-removed] observer={:?}", e.observer);
            }
            EventKind::ListenerOverflow | EventKind::ListenerPanicked => {
                tracing::warn!("[{:?}] {}", e.kind, e.reason.as_deref().unwrap_or("unknown"));
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
