//! # Action router.
//!
//! Single entry point for an incoming action. Decides between immediate
//! execution and scheduling as a [`Task`].
//!
//! ```text
//! process_action(a)
//!   ├─ middleware veto                      ─► Done(Err(Rejected))
//!   ├─ thunk action, not bypass             ─► Task(owner = root thunk) ─► Pending
//!   ├─ thunk action, bypass                 ─► tracked, executor now ─► Done | Pending
//!   ├─ bypass, or admitted by LockManager   ─► executor now ─► Done | Pending
//!   └─ free action blocked by a lock        ─► Task(ephemeral lock, own id) ─► Pending
//! ```
//!
//! Action failures travel inside the returned completion. Only programmer
//! errors (an unknown or finished thunk) are returned as `Err`.

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::oneshot;

use super::executor::ActionExecutor;
use super::middleware::Middleware;
use crate::actions::{Action, ActionCompletion, ActionResult};
use crate::error::{ActionError, BridgeError, TaskError};
use crate::events::{Bus, Event, EventKind};
use crate::scheduler::{Task, TaskScheduler};
use crate::thunks::ThunkManager;

/// Routes actions to the executor or the scheduler.
pub struct ActionRouter {
    executor: Arc<ActionExecutor>,
    scheduler: Arc<TaskScheduler>,
    thunks: Arc<ThunkManager>,
    middleware: Arc<[Arc<dyn Middleware>]>,
    bus: Bus,
    default_priority: i32,
    bypass_priority: i32,
}

impl ActionRouter {
    pub fn new(
        executor: Arc<ActionExecutor>,
        scheduler: Arc<TaskScheduler>,
        thunks: Arc<ThunkManager>,
        middleware: Vec<Arc<dyn Middleware>>,
        bus: Bus,
        default_priority: i32,
        bypass_priority: i32,
    ) -> Self {
        Self {
            executor,
            scheduler,
            thunks,
            middleware: middleware.into(),
            bus,
            default_priority,
            bypass_priority,
        }
    }

    /// Routes one action.
    ///
    /// Must be called from within a tokio runtime.
    pub fn process_action(&self, action: Action) -> Result<ActionCompletion, BridgeError> {
        self.bus.publish({
            let ev = Event::new(EventKind::ActionReceived)
                .with_action(action.id.as_str(), action.action_type.as_str())
                .with_thunk_opt(action.thunk_parent_id.as_deref());
            match action.source_observer_id {
                Some(obs) => ev.with_observer(obs),
                None => ev,
            }
        });

        if let Some(m) = self.middleware.iter().find(|m| !m.before_action(&action)) {
            tracing::debug!(action = %action.id, middleware = m.name(), "action rejected");
            let res = Err(ActionError::Rejected {
                action_type: action.action_type.clone(),
                middleware: m.name(),
            });
            run_after(&self.middleware, &action, &res);
            return Ok(ActionCompletion::Done(res));
        }

        match action.thunk_parent_id.clone() {
            Some(thunk_id) if !action.bypass_lock => self.schedule_thunk_action(thunk_id, action),
            Some(thunk_id) => self.execute_thunk_bypass(thunk_id, action),
            _ if action.bypass_lock || self.scheduler.locks().can_process_action(&action) => {
                Ok(self.execute_now(action))
            }
            _ => Ok(self.schedule_blocked(action)),
        }
    }

    fn schedule_thunk_action(
        &self,
        thunk_id: String,
        action: Action,
    ) -> Result<ActionCompletion, BridgeError> {
        let scope = self.thunks.lock_scope(&thunk_id)?;
        self.thunks.track_action(&thunk_id, &action.id)?;

        let priority = if scope.bypass {
            self.bypass_priority
        } else {
            self.default_priority
        };
        let (tx, rx) = oneshot::channel();
        let action_id = action.id.clone();
        let executor = Arc::clone(&self.executor);
        let thunks = Arc::clone(&self.thunks);
        let middleware = Arc::clone(&self.middleware);
        let settled_thunk = thunk_id.clone();

        let task = Task::new(action_id.clone(), thunk_id, move || async move {
            let res = executor.execute(&action).settle().await;
            thunks.action_settled(&settled_thunk, &action.id);
            finish(&middleware, &action, res, tx)
        })
        .with_lock_owner(scope.owner)
        .with_keys(scope.keys)
        .with_priority(priority)
        .concurrent(scope.bypass);

        self.scheduler.enqueue(task);
        Ok(ActionCompletion::from_receiver(rx, action_id))
    }

    /// Bypass action of a thunk: skips the queue but still holds the thunk open
    /// until it settled.
    fn execute_thunk_bypass(
        &self,
        thunk_id: String,
        action: Action,
    ) -> Result<ActionCompletion, BridgeError> {
        self.thunks.track_action(&thunk_id, &action.id)?;
        let action_id = action.id.clone();
        match self.execute_now(action) {
            ActionCompletion::Done(res) => {
                self.thunks.action_settled(&thunk_id, &action_id);
                Ok(ActionCompletion::Done(res))
            }
            ActionCompletion::Pending(fut) => {
                // Driven here: the thunk must not depend on the caller polling.
                let (tx, rx) = oneshot::channel();
                let thunks = Arc::clone(&self.thunks);
                let settled_id = action_id.clone();
                tokio::spawn(async move {
                    let res = fut.await;
                    thunks.action_settled(&thunk_id, &settled_id);
                    let _ = tx.send(res);
                });
                Ok(ActionCompletion::from_receiver(rx, action_id))
            }
        }
    }

    fn execute_now(&self, action: Action) -> ActionCompletion {
        match self.executor.execute(&action) {
            ActionCompletion::Done(res) => {
                run_after(&self.middleware, &action, &res);
                ActionCompletion::Done(res)
            }
            ActionCompletion::Pending(fut) => {
                let middleware = Arc::clone(&self.middleware);
                ActionCompletion::Pending(
                    async move {
                        let res = fut.await;
                        run_after(&middleware, &action, &res);
                        res
                    }
                    .boxed(),
                )
            }
        }
    }

    /// Free action blocked by an active lock: runs under a lock entry of its own.
    fn schedule_blocked(&self, action: Action) -> ActionCompletion {
        tracing::debug!(action = %action.id, action_type = %action.action_type, "free action queued behind lock");
        let (tx, rx) = oneshot::channel();
        let action_id = action.id.clone();
        let keys = action.keys.clone();
        let executor = Arc::clone(&self.executor);
        let middleware = Arc::clone(&self.middleware);

        let task = Task::new(action_id.clone(), action_id.clone(), move || async move {
            let res = executor.execute(&action).settle().await;
            finish(&middleware, &action, res, tx)
        })
        .with_keys(keys)
        .with_priority(self.default_priority)
        .with_ephemeral_lock();

        self.scheduler.enqueue(task);
        ActionCompletion::from_receiver(rx, action_id)
    }
}

fn run_after(middleware: &[Arc<dyn Middleware>], action: &Action, res: &ActionResult) {
    for m in middleware {
        m.after_action(action, res);
    }
}

/// Reports the action result to its caller and maps it onto the task result.
fn finish(
    middleware: &[Arc<dyn Middleware>],
    action: &Action,
    res: ActionResult,
    tx: oneshot::Sender<ActionResult>,
) -> Result<(), TaskError> {
    run_after(middleware, action, &res);
    let task_res = res.as_ref().map(|_| ()).map_err(|e| TaskError::Fail {
        error: e.to_string(),
    });
    let _ = tx.send(res);
    task_res
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::State;
    use crate::adapters::{Applied, StateAdapter, StateListener, Unsubscribe};
    use crate::locks::LockManager;
    use crate::thunks::{ThunkOutcome, ThunkSpec, ThunkState};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// `SLOW` applies asynchronously once a gate permit is added.
    struct Recorder {
        applied: Arc<Mutex<Vec<String>>>,
        gate: Arc<Semaphore>,
    }

    impl Default for Recorder {
        fn default() -> Self {
            Self {
                applied: Arc::default(),
                gate: Arc::new(Semaphore::new(0)),
            }
        }
    }

    impl StateAdapter for Recorder {
        fn kind(&self) -> &'static str {
            "recorder"
        }

        fn get_state(&self) -> State {
            json!({})
        }

        fn subscribe(&self, _listener: StateListener) -> Unsubscribe {
            Unsubscribe::noop()
        }

        fn process_action(&self, action: &Action) -> anyhow::Result<Applied> {
            if action.action_type == "FAIL" {
                anyhow::bail!("refused");
            }
            if action.action_type == "SLOW" {
                let applied = Arc::clone(&self.applied);
                let gate = Arc::clone(&self.gate);
                return Ok(Applied::Async(
                    async move {
                        gate.acquire().await?.forget();
                        applied.lock().push("SLOW".to_string());
                        Ok(())
                    }
                    .boxed(),
                ));
            }
            self.applied.lock().push(action.action_type.clone());
            Ok(Applied::Sync)
        }
    }

    struct DenyAdmin;

    impl Middleware for DenyAdmin {
        fn name(&self) -> &'static str {
            "deny-admin"
        }

        fn before_action(&self, action: &Action) -> bool {
            !action.action_type.starts_with("ADMIN:")
        }
    }

    struct Fixture {
        router: ActionRouter,
        thunks: Arc<ThunkManager>,
        scheduler: Arc<TaskScheduler>,
        adapter: Arc<Recorder>,
    }

    fn fixture() -> Fixture {
        let bus = Bus::new(256);
        let locks = Arc::new(LockManager::new(bus.clone()));
        let scheduler = TaskScheduler::new(locks, bus.clone());
        let thunks = ThunkManager::new(scheduler.clone(), bus.clone(), Duration::ZERO);
        let adapter = Arc::new(Recorder::default());
        let executor = Arc::new(ActionExecutor::new(adapter.clone(), bus.clone()));
        let router = ActionRouter::new(
            executor,
            scheduler.clone(),
            thunks.clone(),
            vec![Arc::new(DenyAdmin)],
            bus,
            0,
            100,
        );
        Fixture {
            router,
            thunks,
            scheduler,
            adapter,
        }
    }

    #[tokio::test]
    async fn free_action_runs_immediately() {
        let f = fixture();
        let completion = f.router.process_action(Action::new("THEME:TOGGLE")).expect("route");
        assert!(completion.is_sync());
        assert!(completion.settle().await.is_ok());
        assert_eq!(*f.adapter.applied.lock(), vec!["THEME:TOGGLE"]);
    }

    #[tokio::test]
    async fn thunk_actions_are_scheduled_and_tracked() {
        let f = fixture();
        f.thunks
            .register_thunk(ThunkSpec::new("A", 1).with_keys(["counter"]))
            .expect("register");
        f.thunks.execute_thunk("A").expect("execute");

        let first = f
            .router
            .process_action(Action::new("COUNTER:SET").with_thunk("A"))
            .expect("route");
        let second = f
            .router
            .process_action(Action::new("COUNTER:ADD").with_thunk("A"))
            .expect("route");
        assert!(!first.is_sync());

        assert!(first.settle().await.is_ok());
        assert!(second.settle().await.is_ok());
        assert_eq!(*f.adapter.applied.lock(), vec!["COUNTER:SET", "COUNTER:ADD"]);
        assert!(f.thunks.get_pending_actions("A").expect("pending").is_empty());
        assert!(f.scheduler.locks().holds("A"));
    }

    #[tokio::test]
    async fn free_action_waits_behind_global_thunk() {
        let f = fixture();
        f.thunks.register_thunk(ThunkSpec::new("G", 1)).expect("register");
        f.thunks.execute_thunk("G").expect("execute");
        f.router
            .process_action(Action::new("GLOBAL:SET").with_thunk("G"))
            .expect("route")
            .settle()
            .await
            .expect("applied");

        let blocked = f
            .router
            .process_action(Action::new("THEME:TOGGLE").with_keys(["theme"]))
            .expect("route");
        assert!(!blocked.is_sync());
        tokio::task::yield_now().await;
        assert_eq!(f.scheduler.get_queue_status().queued_tasks, 1);

        f.thunks.complete_thunk("G", None).expect("complete");
        assert!(blocked.settle().await.is_ok());
        tokio::task::yield_now().await;
        // The ephemeral lock of the free action is gone again.
        assert!(f.scheduler.locks().is_empty());
    }

    #[tokio::test]
    async fn bypass_action_ignores_locks() {
        let f = fixture();
        f.thunks.register_thunk(ThunkSpec::new("G", 1)).expect("register");
        f.scheduler.locks().acquire("G", None, false).expect("lock");

        let completion = f
            .router
            .process_action(Action::new("DEBUG:DUMP").bypassing_lock())
            .expect("route");
        assert!(completion.is_sync());
    }

    #[tokio::test]
    async fn middleware_veto_and_failures_are_values() {
        let f = fixture();
        let rejected = f
            .router
            .process_action(Action::new("ADMIN:RESET"))
            .expect("route")
            .settle()
            .await;
        assert!(matches!(rejected, Err(ActionError::Rejected { middleware: "deny-admin", .. })));

        let failed = f
            .router
            .process_action(Action::new("FAIL"))
            .expect("route")
            .settle()
            .await;
        assert!(matches!(failed, Err(ActionError::Processing { .. })));
    }

    #[tokio::test]
    async fn failed_thunk_action_settles_as_value() {
        let f = fixture();
        f.thunks
            .register_thunk(ThunkSpec::new("A", 1).with_keys(["counter"]))
            .expect("register");
        f.thunks.execute_thunk("A").expect("execute");

        let failed = f
            .router
            .process_action(Action::new("FAIL").with_thunk("A"))
            .expect("route")
            .settle()
            .await;
        assert!(matches!(failed, Err(ActionError::Processing { .. })));
        assert!(f.thunks.get_pending_actions("A").expect("pending").is_empty());

        // The queue keeps going after the failed task.
        f.router
            .process_action(Action::new("COUNTER:SET").with_thunk("A"))
            .expect("route")
            .settle()
            .await
            .expect("applied");
        assert_eq!(*f.adapter.applied.lock(), vec!["COUNTER:SET"]);
    }

    #[tokio::test]
    async fn bypass_thunk_action_keeps_thunk_open_until_settled() {
        let f = fixture();
        let handle = f
            .thunks
            .register_thunk(ThunkSpec::new("A", 1).with_keys(["counter"]))
            .expect("register");
        f.thunks.execute_thunk("A").expect("execute");

        let completion = f
            .router
            .process_action(Action::new("SLOW").with_thunk("A").bypassing_lock())
            .expect("route");
        assert!(!completion.is_sync());
        assert_eq!(f.thunks.get_pending_actions("A").expect("pending").len(), 1);
        // Nobody waits on the completion; the thunk still sees it settle.
        drop(completion);

        f.thunks.complete_thunk("A", None).expect("complete");
        assert_eq!(f.thunks.get("A").expect("A").state, ThunkState::Executing);

        f.adapter.gate.add_permits(1);
        assert_eq!(handle.wait().await, ThunkOutcome::Completed(None));
        assert_eq!(*f.adapter.applied.lock(), vec!["SLOW"]);
    }

    #[tokio::test]
    async fn unknown_thunk_is_a_programmer_error() {
        let f = fixture();
        let err = f
            .router
            .process_action(Action::new("X").with_thunk("nope"))
            .map(|_| ())
            .unwrap_err();
        assert_eq!(err, BridgeError::UnknownThunk { id: "nope".into() });
    }
}
