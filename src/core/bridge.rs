//! # Bridge: owns every component and exposes the host API.
//!
//! The [`Bridge`] is built by [`BridgeBuilder`](crate::BridgeBuilder) in
//! dependency order and ties the components together:
//!
//! ```text
//! process_batch / enqueue_action
//!        │
//!        ▼
//!   ActionRouter ──► TaskScheduler ──► LockManager
//!        │                 │
//!        └──► ActionExecutor ──► StateAdapter ──(change)──► on_state_change
//!                                                            │
//!                               SubscriptionManager::collect ┘
//!                                      │
//!                   ObserverTransport::send("state-update") ─► observers
//!                                      │                         │
//!                   ThunkManager::track_state_update       acknowledge()
//!
//! Bus ──► listener loop ──► ResourceManager::listeners() ──► telemetry listeners
//! maintenance loop (sweep_interval) ──► run_maintenance()
//! ```
//!
//! ## Rules
//! - A state change caused by a thunk's action is tracked under a fresh update
//!   id; the thunk cannot finish until every reached observer acknowledged.
//! - Observers the transport could not reach are not waited for.
//! - After [`shutdown`](Bridge::shutdown) every entry point returns [`BridgeError::Closed`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::context::ThunkContext;
use crate::actions::{Action, ActionCompletion, ObserverId, State};
use crate::adapters::{ObserverTransport, Unsubscribe};
use crate::batcher::{BatchItem, BatchRequest, BatchResponse, BatchResult};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::events::{Bus, Event, EventKind};
use crate::listeners::{Listener, ListenerId};
use crate::locks::LockManager;
use crate::resources::ResourceManager;
use crate::router::{ActionExecutor, ActionRouter, current_action, current_thunk};
use crate::scheduler::{QueueStatus, TaskScheduler};
use crate::subscriptions::{SubscriptionHandle, SubscriptionManager};
use crate::thunks::{ActiveThunks, ThunkHandle, ThunkManager, ThunkOutcome, ThunkSpec};

/// Transport channel carrying partial state to observers.
pub const STATE_UPDATE_CHANNEL: &str = "state-update";

/// What one maintenance pass reclaimed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Unacknowledged updates dropped after `ack_max_age`.
    pub expired_updates: usize,
    /// Finished thunks force-evicted after `thunk_max_age`.
    pub swept_thunks: usize,
    /// Observers found dead and cleaned up.
    pub dead_observers: Vec<ObserverId>,
}

/// Concurrency-control core of the state bridge.
pub struct Bridge {
    pub(super) cfg: BridgeConfig,
    pub(super) bus: Bus,
    pub(super) locks: Arc<LockManager>,
    pub(super) scheduler: Arc<TaskScheduler>,
    pub(super) thunks: Arc<ThunkManager>,
    pub(super) executor: Arc<ActionExecutor>,
    pub(super) router: ActionRouter,
    pub(super) subscriptions: SubscriptionManager,
    pub(super) resources: ResourceManager,
    pub(super) transport: Arc<dyn ObserverTransport>,
    pub(super) last_state: Mutex<State>,
    pub(super) adapter_subscription: Mutex<Option<Unsubscribe>>,
    pub(super) token: CancellationToken,
    pub(super) closed: AtomicBool,
    pub(super) maintenance_started: AtomicBool,
}

impl Bridge {
    /// Routes an action submitted by `source`, optionally on behalf of a thunk.
    pub fn enqueue_action(
        &self,
        mut action: Action,
        source: ObserverId,
        parent_thunk: Option<&str>,
    ) -> Result<ActionCompletion, BridgeError> {
        self.ensure_open()?;
        action.source_observer_id.get_or_insert(source);
        if let Some(parent) = parent_thunk {
            action.thunk_parent_id = Some(parent.to_string());
        }
        self.router.process_action(action)
    }

    /// Registers a thunk. The handle resolves once the thunk finished.
    pub fn register_thunk(&self, spec: ThunkSpec) -> Result<ThunkHandle, BridgeError> {
        self.ensure_open()?;
        self.thunks.register_thunk(spec)
    }

    /// Activates a registered thunk. Fails with [`BridgeError::Locked`] while an
    /// overlapping thunk holds its keys; [`run_thunk`](Self::run_thunk) waits instead.
    pub fn execute_thunk(&self, id: &str) -> Result<(), BridgeError> {
        self.thunks.execute_thunk(id)
    }

    pub fn complete_thunk(&self, id: &str, result: Option<State>) -> Result<(), BridgeError> {
        self.thunks.complete_thunk(id, result)
    }

    pub fn fail_thunk(&self, id: &str, error: impl Into<String>) -> Result<(), BridgeError> {
        self.thunks.fail_thunk(id, error)
    }

    /// Registers, executes and drives a thunk body to its end.
    ///
    /// Execution waits until no overlapping thunk holds a lock entry, so the
    /// body never observes state another thunk is still changing.
    /// `Ok(result)` from the body requests completion, `Err` fails the thunk.
    /// Resolves with the final outcome, after every acknowledgement settled.
    pub async fn run_thunk<F, Fut>(
        self: &Arc<Self>,
        spec: ThunkSpec,
        body: F,
    ) -> Result<ThunkOutcome, BridgeError>
    where
        F: FnOnce(ThunkContext) -> Fut,
        Fut: Future<Output = anyhow::Result<Option<State>>>,
    {
        let source = spec.source_observer_id;
        let handle = self.register_thunk(spec)?;
        let id = handle.id().to_string();
        tokio::select! {
            res = self.thunks.execute_when_unlocked(&id) => res?,
            _ = self.token.cancelled() => {
                let _ = self.thunks.fail_thunk(&id, "bridge shut down");
                return Err(BridgeError::Closed);
            }
        }

        let ctx = ThunkContext::new(Arc::clone(self), id.clone(), source);
        match body(ctx).await {
            Ok(result) => self.complete_thunk(&id, result)?,
            Err(e) => self.fail_thunk(&id, format!("{e:#}"))?,
        }
        Ok(handle.wait().await)
    }

    /// Subscribes `observer` to `keys` (`None` = full state).
    pub fn subscribe(&self, observer: ObserverId, keys: Option<&[String]>) -> SubscriptionHandle {
        if let Some(evicted) = self.resources.track_observer(observer) {
            self.forget_observer(evicted);
        }
        self.subscriptions.subscribe(observer, keys, None)
    }

    /// Removes `keys` from `observer`'s interest, or the observer when `keys` is `None`.
    pub fn unsubscribe(&self, observer: ObserverId, keys: Option<&[String]>) -> bool {
        if keys.is_none() {
            self.resources.untrack_observer(observer);
        }
        self.subscriptions.unsubscribe(observer, keys)
    }

    /// Records an observer's acknowledgement of a state update.
    pub fn acknowledge(&self, update_id: &str, observer: ObserverId) -> bool {
        self.thunks.acknowledge_state_update(update_id, observer)
    }

    /// Receiving side of the batch transport: routes every item and answers
    /// with one result per action.
    pub async fn process_batch(&self, request: BatchRequest, source: ObserverId) -> BatchResponse {
        if let Some(evicted) = self.resources.track_observer(source) {
            self.forget_observer(evicted);
        }
        tracing::debug!(batch = %request.batch_id, size = request.actions.len(), observer = source, "batch received");

        let pending = request.actions.into_iter().map(|item| {
            let BatchItem {
                mut action,
                id,
                parent_id,
            } = item;
            action.id = id.clone();
            if action.thunk_parent_id.is_none() {
                action.thunk_parent_id = parent_id;
            }
            let routed = self.enqueue_action(action, source, None);
            async move {
                let res = match routed {
                    Ok(completion) => completion.settle().await.map_err(|e| e.to_string()),
                    Err(e) => Err(e.to_string()),
                };
                match res {
                    Ok(()) => BatchResult::ok(id),
                    Err(message) => BatchResult::failed(id, message),
                }
            }
        });

        BatchResponse {
            results: join_all(pending).await,
        }
    }

    pub fn get_queue_status(&self) -> QueueStatus {
        self.scheduler.get_queue_status()
    }

    pub fn get_active_thunks_summary(&self) -> ActiveThunks {
        self.thunks.get_active_thunks_summary()
    }

    /// Current authoritative state.
    pub fn get_state(&self) -> State {
        self.executor.adapter().get_state()
    }

    pub fn register_listener(&self, listener: Arc<dyn Listener>) -> ListenerId {
        self.resources.register_listener(listener)
    }

    pub fn deregister_listener(&self, id: ListenerId) -> bool {
        self.resources.deregister_listener(id)
    }

    /// One pass of acknowledgement expiry, thunk sweep and observer reconciliation.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let expired_updates = self.thunks.cleanup_expired_updates(self.cfg.ack_max_age);
        let swept_thunks = self.thunks.sweep(self.cfg.thunk_max_age);
        let dead_observers = self.resources.reconcile(self.transport.as_ref());
        for &observer in &dead_observers {
            self.forget_observer(observer);
        }

        let report = MaintenanceReport {
            expired_updates,
            swept_thunks,
            dead_observers,
        };
        if report != MaintenanceReport::default() {
            tracing::debug!(?report, "maintenance pass");
        }
        report
    }

    /// Starts the periodic maintenance loop (once). Returns `None` when the
    /// loop is disabled or already running.
    pub fn spawn_maintenance(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let period = self.cfg.maintenance_interval()?;
        if self.maintenance_started.swap(true, Ordering::SeqCst) {
            return None;
        }

        let weak = Arc::downgrade(self);
        let token = self.token.clone();
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(bridge) = weak.upgrade() else { break };
                        bridge.run_maintenance();
                    }
                }
            }
        }))
    }

    /// Stops background loops, detaches from the adapter and drains listeners.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.token.cancel();
        let unsub = self.adapter_subscription.lock().take();
        if let Some(unsub) = unsub {
            unsub.call();
        }
        self.resources.listeners().shutdown().await;
        tracing::debug!("bridge shut down");
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.cfg
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    pub fn thunks(&self) -> &Arc<ThunkManager> {
        &self.thunks
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn resources(&self) -> &ResourceManager {
        &self.resources
    }

    /// Drops an observer's subscription and every acknowledgement it still owes.
    fn forget_observer(&self, observer: ObserverId) {
        self.subscriptions.unsubscribe(observer, None);
        self.thunks.cleanup_dead_renderer(observer);
    }

    fn ensure_open(&self) -> Result<(), BridgeError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(BridgeError::Closed)
        } else {
            Ok(())
        }
    }

    /// Adapter change listener: diff, track, deliver.
    ///
    /// The update is tracked for every intended recipient before the first
    /// send, so an acknowledgement racing the send always finds it. Recipients
    /// the transport could not reach are dropped again afterwards.
    pub(super) fn on_state_change(&self, next: &State) {
        let prev = std::mem::replace(&mut *self.last_state.lock(), next.clone());
        let deliveries = self.subscriptions.collect(&prev, next);
        if deliveries.is_empty() {
            return;
        }

        let update_id = uuid::Uuid::new_v4().to_string();
        let thunk = current_thunk();
        let action = current_action();
        if let Some(thunk) = &thunk {
            self.thunks
                .track_state_update(&update_id, thunk, deliveries.iter().map(|d| d.observer));
        }

        for d in &deliveries {
            let mut payload = json!({ "updateId": update_id, "state": d.state });
            if let Some(t) = &thunk {
                payload["thunkId"] = json!(t);
            }
            if self.transport.send(d.observer, STATE_UPDATE_CHANNEL, &payload) {
                let ev = Event::new(EventKind::StateUpdateSent)
                    .with_update(update_id.as_str())
                    .with_observer(d.observer)
                    .with_thunk_opt(thunk.as_deref());
                self.bus.publish(match &action {
                    Some((id, action_type)) => ev.with_action(id.as_str(), action_type.as_str()),
                    None => ev,
                });
            } else {
                tracing::debug!(observer = d.observer, update = %update_id, "observer unreachable");
                if thunk.is_some() {
                    self.thunks.drop_update_recipient(&update_id, d.observer);
                }
            }
        }
        self.subscriptions.deliver(&deliveries);
    }

    /// Forwards bus events to the telemetry listeners until shutdown.
    pub(super) fn spawn_listener_loop(self: &Arc<Self>) {
        let mut rx = self.bus.subscribe();
        let weak = Arc::downgrade(self);
        let token = self.token.clone();
        tokio::spawn(async move {
            loop {
                let ev = tokio::select! {
                    _ = token.cancelled() => break,
                    ev = rx.recv() => ev,
                };
                match ev {
                    Ok(ev) => {
                        let Some(bridge) = weak.upgrade() else { break };
                        bridge.resources.listeners().emit(&ev);
                    }
                    Err(RecvError::Lagged(n)) => {
                        tracing::debug!(skipped = n, "listener loop lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }
}
