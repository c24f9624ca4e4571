//! # Action executor.
//!
//! Applies one action to the [`StateAdapter`] and turns the adapter's answer
//! into an [`ActionCompletion`]. While the adapter runs (and while an
//! asynchronous completion is polled) the acting thunk and action are visible
//! through [`current_thunk`] and [`current_action`], so change listeners can
//! attribute state changes.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::time::Instant;

use crate::actions::{Action, ActionCompletion};
use crate::adapters::{Applied, StateAdapter};
use crate::error::{ActionError, Phase};
use crate::events::{Bus, Event, EventKind};

/// What is being applied on the current task.
#[derive(Clone)]
struct Applying {
    thunk: Option<String>,
    action_id: String,
    action_type: String,
}

impl Applying {
    fn of(action: &Action) -> Self {
        Self {
            thunk: action.thunk_parent_id.clone(),
            action_id: action.id.clone(),
            action_type: action.action_type.clone(),
        }
    }
}

tokio::task_local! {
    static APPLYING: Applying;
}

/// Thunk whose action is being applied on this task, if any.
pub fn current_thunk() -> Option<String> {
    APPLYING.try_with(|a| a.thunk.clone()).ok().flatten()
}

/// Id and type of the action being applied on this task, if any.
pub fn current_action() -> Option<(String, String)> {
    APPLYING
        .try_with(|a| (a.action_id.clone(), a.action_type.clone()))
        .ok()
}

/// Applies actions to the state container.
pub struct ActionExecutor {
    adapter: Arc<dyn StateAdapter>,
    bus: Bus,
}

impl ActionExecutor {
    pub fn new(adapter: Arc<dyn StateAdapter>, bus: Bus) -> Self {
        Self { adapter, bus }
    }

    /// The adapter actions are applied to.
    pub fn adapter(&self) -> &Arc<dyn StateAdapter> {
        &self.adapter
    }

    /// Applies `action`.
    ///
    /// Returns [`ActionCompletion::Done`] when the adapter applied (or rejected)
    /// it synchronously and [`ActionCompletion::Pending`] otherwise. Adapter
    /// errors and panics become [`ActionError::Processing`].
    pub fn execute(&self, action: &Action) -> ActionCompletion {
        let started = Instant::now();
        let scope = Applying::of(action);
        let kind = self.adapter.kind();

        let applied = std::panic::catch_unwind(AssertUnwindSafe(|| {
            APPLYING.sync_scope(scope.clone(), || self.adapter.process_action(action))
        }));

        let fut = match applied {
            Ok(Ok(Applied::Sync)) => {
                publish_applied(&self.bus, action, started.elapsed());
                return ActionCompletion::Done(Ok(()));
            }
            Ok(Ok(Applied::Async(fut))) => fut,
            Ok(Err(e)) => {
                let err = failure(action, kind, Phase::Sync, started.elapsed(), format!("{e:#}"));
                publish_failed(&self.bus, action, &err);
                return ActionCompletion::Done(Err(err));
            }
            Err(_) => {
                let err = failure(action, kind, Phase::Sync, started.elapsed(), "adapter panicked".into());
                publish_failed(&self.bus, action, &err);
                return ActionCompletion::Done(Err(err));
            }
        };

        let bus = self.bus.clone();
        let action = action.clone();
        ActionCompletion::Pending(
            async move {
                let res = AssertUnwindSafe(APPLYING.scope(scope, fut))
                    .catch_unwind()
                    .await;
                let message = match res {
                    Ok(Ok(())) => {
                        publish_applied(&bus, &action, started.elapsed());
                        return Ok(());
                    }
                    Ok(Err(e)) => format!("{e:#}"),
                    Err(_) => "adapter completion panicked".to_string(),
                };
                let err = failure(&action, kind, Phase::Async, started.elapsed(), message);
                publish_failed(&bus, &action, &err);
                Err(err)
            }
            .boxed(),
        )
    }
}

fn failure(
    action: &Action,
    adapter: &'static str,
    phase: Phase,
    elapsed: Duration,
    message: String,
) -> ActionError {
    ActionError::Processing {
        action_type: action.action_type.clone(),
        adapter,
        phase,
        elapsed,
        message,
    }
}

fn publish_applied(bus: &Bus, action: &Action, elapsed: Duration) {
    bus.publish(
        Event::new(EventKind::ActionApplied)
            .with_action(action.id.as_str(), action.action_type.as_str())
            .with_thunk_opt(action.thunk_parent_id.as_deref())
            .with_duration(elapsed),
    );
}

fn publish_failed(bus: &Bus, action: &Action, err: &ActionError) {
    tracing::debug!(action = %action.id, action_type = %action.action_type, error = %err, "action failed");
    bus.publish(
        Event::new(EventKind::ActionFailed)
            .with_action(action.id.as_str(), action.action_type.as_str())
            .with_thunk_opt(action.thunk_parent_id.as_deref())
            .with_reason(err.to_string()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::State;
    use crate::adapters::{StateListener, Unsubscribe};
    use parking_lot::Mutex;
    use serde_json::json;

    /// Adapter recording which thunk and action were current while applying.
    #[derive(Default)]
    struct Spy {
        seen: Mutex<Vec<Option<String>>>,
        actions: Mutex<Vec<Option<(String, String)>>>,
    }

    impl StateAdapter for Spy {
        fn kind(&self) -> &'static str {
            "spy"
        }

        fn get_state(&self) -> State {
            json!({})
        }

        fn subscribe(&self, _listener: StateListener) -> Unsubscribe {
            Unsubscribe::noop()
        }

        fn process_action(&self, action: &Action) -> anyhow::Result<Applied> {
            self.seen.lock().push(current_thunk());
            self.actions.lock().push(current_action());
            match action.action_type.as_str() {
                "SYNC" => Ok(Applied::Sync),
                "ASYNC" => Ok(Applied::Async(
                    async {
                        tokio::task::yield_now().await;
                        Ok(())
                    }
                    .boxed(),
                )),
                "ASYNC_FAIL" => Ok(Applied::Async(
                    async { Err(anyhow::anyhow!("late failure")) }.boxed(),
                )),
                "PANIC" => panic!("adapter bug"),
                other => anyhow::bail!("unknown action {other}"),
            }
        }
    }

    fn executor() -> (ActionExecutor, Arc<Spy>) {
        let spy = Arc::new(Spy::default());
        (ActionExecutor::new(spy.clone(), Bus::new(64)), spy)
    }

    #[tokio::test]
    async fn sync_application_is_done() {
        let (exec, spy) = executor();
        let action = Action::new("SYNC").with_thunk("A");
        let completion = exec.execute(&action);
        assert!(completion.is_sync());
        assert!(completion.settle().await.is_ok());
        assert_eq!(*spy.seen.lock(), vec![Some("A".to_string())]);
        assert_eq!(
            *spy.actions.lock(),
            vec![Some((action.id.clone(), "SYNC".to_string()))]
        );
        assert_eq!(current_thunk(), None);
        assert_eq!(current_action(), None);
    }

    #[tokio::test]
    async fn async_application_is_pending() {
        let (exec, _) = executor();
        let completion = exec.execute(&Action::new("ASYNC"));
        assert!(!completion.is_sync());
        assert!(completion.settle().await.is_ok());
    }

    #[tokio::test]
    async fn failures_carry_phase_and_adapter() {
        let (exec, _) = executor();

        let sync_err = exec.execute(&Action::new("NOPE")).settle().await.unwrap_err();
        assert_eq!(sync_err.as_label(), "action_failed_sync");
        assert!(matches!(
            sync_err,
            ActionError::Processing { adapter: "spy", ref action_type, .. } if action_type == "NOPE"
        ));

        let async_err = exec.execute(&Action::new("ASYNC_FAIL")).settle().await.unwrap_err();
        assert_eq!(async_err.as_label(), "action_failed_async");

        let panic_err = exec.execute(&Action::new("PANIC")).settle().await.unwrap_err();
        assert_eq!(panic_err.as_label(), "action_failed_sync");
    }
}
