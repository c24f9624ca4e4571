//! # Thunk lifecycle manager.
//!
//! Owns the registry of thunks and decides when a thunk is really finished:
//! only after its handler asked for completion, **all** of its actions were
//! applied, and every observer notified of a change it caused acknowledged.
//!
//! ## Lifecycle
//! ```text
//! register_thunk ──► Pending ──execute_thunk──► Executing ──┬─► Completed
//!                                                           └─► Failed
//!
//! execute_thunk(id)
//!   ├─ nested ─► Executing under the root ancestor's lock entry
//!   ├─ root, keys free ─► lock entry taken ─► Executing
//!   └─ root, keys held elsewhere ─► BridgeError::Locked, stays Pending
//!
//! complete_thunk(id)
//!   ├─ pending actions, live children or unacknowledged updates ─► deferred
//!   └─ otherwise ─► finalize
//!
//! action_settled / child finished / acknowledgement / dead observer / expiry
//!   └─► last obligation gone and completion requested ─► finalize
//!
//! finalize: Completed ─► lock released via scheduler ─► waiters resolved
//!           ─► parent re-checked ─► yield one tick
//!           ─► pending updates? defer : sleep(grace) ─► evict
//! ```
//!
//! ## Rules
//! - States only move forward; invalid transitions return [`BridgeError::InvalidTransition`].
//! - Unknown ids return [`BridgeError::UnknownThunk`].
//! - The first thunk to execute with no active ancestor becomes root.
//! - A thunk without a parent holds its lock entry from execution until it
//!   finishes; nested thunks run under their root ancestor's entry.
//! - A parent never finishes before its children: completion waits for them
//!   and failure takes every live descendant down with it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::thunk::{
    ActiveThunks, LockScope, Thunk, ThunkHandle, ThunkOutcome, ThunkSpec, ThunkState, ThunkSummary,
};
use super::updates::{AckOutcome, StateUpdateTracker};
use crate::actions::{ObserverId, State};
use crate::error::BridgeError;
use crate::events::{Bus, Event, EventKind};
use crate::scheduler::TaskScheduler;

struct ThunkRecord {
    thunk: Thunk,
    pending_actions: Vec<String>,
    /// `Some(result)` once the handler asked for completion.
    completion: Option<Option<State>>,
    waiters: Vec<oneshot::Sender<ThunkOutcome>>,
    outcome: Option<ThunkOutcome>,
    finished_at: Option<Instant>,
    eviction_deferred: bool,
}

impl ThunkRecord {
    fn new(thunk: Thunk) -> Self {
        Self {
            thunk,
            pending_actions: Vec::new(),
            completion: None,
            waiters: Vec::new(),
            outcome: None,
            finished_at: None,
            eviction_deferred: false,
        }
    }

    /// Marks the record terminal and hands back its waiters.
    fn finish(&mut self, state: ThunkState, outcome: ThunkOutcome) -> Vec<oneshot::Sender<ThunkOutcome>> {
        self.thunk.state = state;
        self.pending_actions.clear();
        self.completion = None;
        self.finished_at = Some(Instant::now());
        self.outcome = Some(outcome);
        std::mem::take(&mut self.waiters)
    }

    fn fail(&mut self, error: &str) -> Vec<oneshot::Sender<ThunkOutcome>> {
        self.thunk.error = Some(error.to_string());
        self.finish(ThunkState::Failed, ThunkOutcome::Failed(error.to_string()))
    }
}

#[derive(Default)]
struct Registry {
    thunks: HashMap<String, ThunkRecord>,
    root: Option<String>,
}

impl Registry {
    fn get(&self, id: &str) -> Result<&ThunkRecord, BridgeError> {
        self.thunks
            .get(id)
            .ok_or_else(|| BridgeError::UnknownThunk { id: id.to_string() })
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut ThunkRecord, BridgeError> {
        self.thunks
            .get_mut(id)
            .ok_or_else(|| BridgeError::UnknownThunk { id: id.to_string() })
    }

    /// Completion was requested and nothing the registry knows of is outstanding.
    fn ready_to_finalize(&self, id: &str) -> bool {
        let Some(rec) = self.thunks.get(id) else {
            return false;
        };
        !rec.thunk.state.is_terminal()
            && rec.completion.is_some()
            && rec.pending_actions.is_empty()
            && rec
                .thunk
                .children
                .iter()
                .all(|c| self.thunks.get(c).is_none_or(|r| r.thunk.state.is_terminal()))
    }

    /// Non-terminal descendants of `id`, parents before children.
    fn live_descendants(&self, id: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut stack = vec![id.to_string()];
        while let Some(current) = stack.pop() {
            let Some(rec) = self.thunks.get(&current) else {
                continue;
            };
            for child in &rec.thunk.children {
                if self.thunks.get(child).is_some_and(|r| !r.thunk.state.is_terminal()) {
                    out.push(child.clone());
                    stack.push(child.clone());
                }
            }
        }
        out
    }

    fn has_active_ancestor(&self, id: &str) -> bool {
        let mut cursor = self.thunks.get(id).and_then(|r| r.thunk.parent_id.clone());
        while let Some(parent) = cursor {
            match self.thunks.get(&parent) {
                Some(rec) if !rec.thunk.state.is_terminal() => return true,
                Some(rec) => cursor = rec.thunk.parent_id.clone(),
                None => return false,
            }
        }
        false
    }

    fn root_ancestor<'a>(&'a self, rec: &'a ThunkRecord) -> &'a ThunkRecord {
        let mut current = rec;
        while let Some(parent) = current.thunk.parent_id.as_deref().and_then(|p| self.thunks.get(p)) {
            current = parent;
        }
        current
    }

    /// Clears the root pointer if it points at `id`.
    fn clear_root(&mut self, id: &str) -> bool {
        if self.root.as_deref() == Some(id) {
            self.root = None;
            true
        } else {
            false
        }
    }
}

/// Registry and lifecycle driver for thunks.
pub struct ThunkManager {
    registry: Mutex<Registry>,
    updates: StateUpdateTracker,
    scheduler: Arc<TaskScheduler>,
    bus: Bus,
    eviction_grace: Duration,
}

impl ThunkManager {
    /// Creates a manager releasing locks through `scheduler`.
    pub fn new(scheduler: Arc<TaskScheduler>, bus: Bus, eviction_grace: Duration) -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(Registry::default()),
            updates: StateUpdateTracker::new(bus.clone()),
            scheduler,
            bus,
            eviction_grace,
        })
    }

    /// Allocates a `Pending` thunk record and returns a handle resolving at its end.
    pub fn register_thunk(&self, spec: ThunkSpec) -> Result<ThunkHandle, BridgeError> {
        let id = spec.id.clone();
        let observer = spec.source_observer_id;
        let (tx, rx) = oneshot::channel();
        {
            let mut reg = self.registry.lock();
            if reg.thunks.contains_key(&id) {
                return Err(BridgeError::DuplicateThunk { id });
            }
            if let Some(parent) = spec.parent_id.as_deref() {
                let rec = reg.get_mut(parent)?;
                if rec.thunk.state.is_terminal() {
                    return Err(BridgeError::InvalidTransition {
                        id: parent.to_string(),
                        from: rec.thunk.state.as_str(),
                        to: ThunkState::Executing.as_str(),
                    });
                }
                rec.thunk.children.insert(id.clone());
            }
            let mut rec = ThunkRecord::new(Thunk::from_spec(spec));
            rec.waiters.push(tx);
            reg.thunks.insert(id.clone(), rec);
        }

        tracing::debug!(thunk = %id, observer, "thunk registered");
        self.bus.publish(
            Event::new(EventKind::ThunkRegistered)
                .with_thunk(id.as_str())
                .with_observer(observer),
        );
        Ok(ThunkHandle::new(id, rx))
    }

    /// Activates a thunk, promoting it to root when nothing else owns the application.
    ///
    /// A thunk without a parent takes its lock entry here. If an overlapping
    /// thunk holds one, [`BridgeError::Locked`] is returned and the thunk stays
    /// `Pending`; [`execute_when_unlocked`](Self::execute_when_unlocked) waits instead.
    pub fn execute_thunk(&self, id: &str) -> Result<(), BridgeError> {
        let became_root = {
            let mut reg = self.registry.lock();
            let rec = reg.get(id)?;
            if rec.thunk.state != ThunkState::Pending {
                return Err(BridgeError::InvalidTransition {
                    id: id.to_string(),
                    from: rec.thunk.state.as_str(),
                    to: ThunkState::Executing.as_str(),
                });
            }
            if reg.root_ancestor(rec).thunk.id == id {
                self.scheduler
                    .locks()
                    .acquire(id, rec.thunk.keys.as_deref(), rec.thunk.bypass_lock)?;
            }
            reg.get_mut(id)?.thunk.state = ThunkState::Executing;

            if reg.root.is_none() && !reg.has_active_ancestor(id) {
                reg.root = Some(id.to_string());
                true
            } else {
                false
            }
        };

        self.bus
            .publish(Event::new(EventKind::ThunkStarted).with_thunk(id));
        if became_root {
            tracing::debug!(thunk = id, "root thunk changed");
            self.bus
                .publish(Event::new(EventKind::RootChanged).with_thunk(id));
        }
        Ok(())
    }

    /// Like [`execute_thunk`](Self::execute_thunk), but waits for overlapping
    /// lock entries to go away instead of failing.
    pub async fn execute_when_unlocked(&self, id: &str) -> Result<(), BridgeError> {
        let locks = self.scheduler.locks();
        loop {
            let released = locks.released();
            tokio::pin!(released);
            released.as_mut().enable();
            match self.execute_thunk(id) {
                Err(BridgeError::Locked(conflict)) => {
                    tracing::debug!(thunk = id, holder = %conflict.holder, "waiting for lock");
                    released.await;
                }
                other => return other,
            }
        }
    }

    /// Requests completion. Finalizes now if nothing is outstanding, otherwise
    /// the last outstanding action, child or acknowledgement finalizes it.
    pub fn complete_thunk(self: &Arc<Self>, id: &str, result: Option<State>) -> Result<(), BridgeError> {
        {
            let mut reg = self.registry.lock();
            let rec = reg.get_mut(id)?;
            if rec.thunk.state.is_terminal() {
                return Err(BridgeError::InvalidTransition {
                    id: id.to_string(),
                    from: rec.thunk.state.as_str(),
                    to: ThunkState::Completed.as_str(),
                });
            }
            rec.completion = Some(result);
        }

        if !self.try_finalize(id) {
            tracing::debug!(thunk = id, "completion deferred");
        }
        Ok(())
    }

    /// Fails a thunk together with its live descendants: purges their queued
    /// tasks, releases the lock and resolves waiters.
    pub fn fail_thunk(self: &Arc<Self>, id: &str, error: impl Into<String>) -> Result<(), BridgeError> {
        let error = error.into();
        let (failed, parent, root_cleared) = {
            let mut reg = self.registry.lock();
            let rec = reg.get(id)?;
            if rec.thunk.state.is_terminal() {
                return Err(BridgeError::InvalidTransition {
                    id: id.to_string(),
                    from: rec.thunk.state.as_str(),
                    to: ThunkState::Failed.as_str(),
                });
            }
            let parent = rec.thunk.parent_id.clone();
            let descendant_error = format!("parent thunk {id} failed: {error}");

            let mut failed = Vec::new();
            for child in reg.live_descendants(id) {
                if let Some(rec) = reg.thunks.get_mut(&child) {
                    let waiters = rec.fail(&descendant_error);
                    failed.push((child, descendant_error.clone(), waiters));
                }
            }
            let waiters = reg.get_mut(id)?.fail(&error);
            failed.push((id.to_string(), error.clone(), waiters));
            (failed, parent, reg.clear_root(id))
        };

        for (thunk, _, _) in &failed {
            self.scheduler.remove_tasks(thunk);
        }
        self.scheduler.release_lock(id);

        for (thunk, reason, waiters) in failed {
            tracing::debug!(thunk = %thunk, error = %reason, "thunk failed");
            self.bus.publish(
                Event::new(EventKind::ThunkFailed)
                    .with_thunk(thunk.as_str())
                    .with_reason(reason.as_str()),
            );
            for w in waiters {
                let _ = w.send(ThunkOutcome::Failed(reason.clone()));
            }
            self.schedule_eviction(&thunk);
        }
        if root_cleared {
            self.bus.publish(Event::new(EventKind::RootChanged));
        }
        if let Some(parent) = parent {
            self.try_finalize(&parent);
        }
        Ok(())
    }

    /// Moves a thunk to `Completed` and releases everything it holds.
    ///
    /// Normally reached through [`complete_thunk`](Self::complete_thunk) once
    /// nothing is outstanding; calling it directly skips those checks.
    pub fn finalize_thunk_completion(self: &Arc<Self>, id: &str) {
        let (waiters, outcome, parent, root_cleared, elapsed) = {
            let mut reg = self.registry.lock();
            let Some(rec) = reg.thunks.get_mut(id) else {
                return;
            };
            if rec.thunk.state.is_terminal() {
                return;
            }
            let result = rec.completion.clone().flatten();
            let outcome = ThunkOutcome::Completed(result);
            let elapsed = rec.thunk.started_at.elapsed();
            let parent = rec.thunk.parent_id.clone();
            let waiters = rec.finish(ThunkState::Completed, outcome.clone());
            (waiters, outcome, parent, reg.clear_root(id), elapsed)
        };

        self.scheduler.release_lock(id);

        tracing::debug!(thunk = id, ?elapsed, "thunk completed");
        self.bus.publish(
            Event::new(EventKind::ThunkCompleted)
                .with_thunk(id)
                .with_duration(elapsed),
        );
        if root_cleared {
            self.bus.publish(Event::new(EventKind::RootChanged));
        }
        for w in waiters {
            let _ = w.send(outcome.clone());
        }
        if let Some(parent) = parent {
            self.try_finalize(&parent);
        }
        self.schedule_eviction(id);
    }

    /// Records an action of `thunk_id` as outstanding.
    pub fn track_action(&self, thunk_id: &str, action_id: &str) -> Result<(), BridgeError> {
        let mut reg = self.registry.lock();
        let rec = reg.get_mut(thunk_id)?;
        if rec.thunk.state.is_terminal() {
            return Err(BridgeError::InvalidTransition {
                id: thunk_id.to_string(),
                from: rec.thunk.state.as_str(),
                to: ThunkState::Executing.as_str(),
            });
        }
        rec.pending_actions.push(action_id.to_string());
        Ok(())
    }

    /// Marks an action as applied (or failed); may finalize a deferred completion.
    pub fn action_settled(self: &Arc<Self>, thunk_id: &str, action_id: &str) {
        {
            let mut reg = self.registry.lock();
            let Some(rec) = reg.thunks.get_mut(thunk_id) else {
                return;
            };
            rec.pending_actions.retain(|a| a != action_id);
        }
        self.try_finalize(thunk_id);
    }

    /// Outstanding action ids of a thunk, in submission order.
    pub fn get_pending_actions(&self, id: &str) -> Result<Vec<String>, BridgeError> {
        Ok(self.registry.lock().get(id)?.pending_actions.clone())
    }

    /// Tracks a state update delivered to `observers` on behalf of `thunk_id`.
    pub fn track_state_update(
        &self,
        update_id: &str,
        thunk_id: &str,
        observers: impl IntoIterator<Item = ObserverId>,
    ) -> bool {
        self.updates.track(update_id, thunk_id, observers)
    }

    /// Releases `observer` from one update it was never delivered to.
    pub fn drop_update_recipient(self: &Arc<Self>, update_id: &str, observer: ObserverId) {
        if let Some(thunk_id) = self.updates.drop_recipient(update_id, observer) {
            self.update_settled(&thunk_id);
        }
    }

    /// Records an acknowledgement.
    ///
    /// Unknown update ids are treated as already settled and return `true`.
    /// Returns `false` only when `observer` was not a recipient of the update.
    pub fn acknowledge_state_update(self: &Arc<Self>, update_id: &str, observer: ObserverId) -> bool {
        let settled = match self.updates.acknowledge(update_id, observer) {
            AckOutcome::Stale => {
                tracing::debug!(update = update_id, observer, "stale acknowledgement");
                None
            }
            AckOutcome::NotRecipient => return false,
            AckOutcome::Pending => None,
            AckOutcome::Settled { thunk_id } => Some(thunk_id),
        };
        self.bus.publish(
            Event::new(EventKind::StateUpdateAcknowledged)
                .with_update(update_id)
                .with_observer(observer),
        );
        if let Some(thunk_id) = settled {
            self.update_settled(&thunk_id);
        }
        true
    }

    /// True if updates are outstanding for `thunk_id` (or for any thunk).
    pub fn has_pending_state_updates(&self, thunk_id: Option<&str>) -> bool {
        self.updates.has_pending(thunk_id)
    }

    /// Releases every update obligation of a dead observer.
    pub fn cleanup_dead_renderer(self: &Arc<Self>, observer: ObserverId) -> bool {
        let (touched, settled) = self.updates.cleanup_dead_renderer(observer);
        for thunk_id in settled {
            self.update_settled(&thunk_id);
        }
        touched
    }

    /// Drops updates older than `max_age`. Returns how many were dropped.
    pub fn cleanup_expired_updates(self: &Arc<Self>, max_age: Duration) -> usize {
        let expired = self.updates.cleanup_expired(max_age);
        let n = expired.len();
        for thunk_id in expired {
            self.update_settled(&thunk_id);
        }
        n
    }

    /// Force-evicts terminal thunks that finished more than `max_age` ago.
    pub fn sweep(&self, max_age: Duration) -> usize {
        let now = Instant::now();
        let stale: Vec<String> = self
            .registry
            .lock()
            .thunks
            .iter()
            .filter(|(_, r)| r.finished_at.is_some_and(|t| now.duration_since(t) >= max_age))
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            self.updates.forget_thunk(id);
            self.evict(id);
        }
        stale.len()
    }

    /// Active (non-terminal) thunks ordered by start time.
    pub fn get_active_thunks_summary(&self) -> ActiveThunks {
        let reg = self.registry.lock();
        let mut active: Vec<&ThunkRecord> = reg
            .thunks
            .values()
            .filter(|r| !r.thunk.state.is_terminal())
            .collect();
        active.sort_by(|a, b| {
            a.thunk
                .started_at
                .cmp(&b.thunk.started_at)
                .then_with(|| a.thunk.id.cmp(&b.thunk.id))
        });
        ActiveThunks {
            root: reg.root.clone(),
            thunks: active
                .into_iter()
                .map(|r| ThunkSummary {
                    id: r.thunk.id.clone(),
                    source_observer_id: r.thunk.source_observer_id,
                    parent_id: r.thunk.parent_id.clone(),
                    state: r.thunk.state,
                    keys: r.thunk.keys.clone(),
                    pending_actions: r.pending_actions.len(),
                    pending_updates: self.updates.pending_for(&r.thunk.id),
                })
                .collect(),
        }
    }

    /// Current root thunk.
    pub fn root_thunk(&self) -> Option<String> {
        self.registry.lock().root.clone()
    }

    /// Snapshot of a thunk record.
    pub fn get(&self, id: &str) -> Option<Thunk> {
        self.registry.lock().thunks.get(id).map(|r| r.thunk.clone())
    }

    /// Lock scope for actions of `id`: its root ancestor's entry.
    pub fn lock_scope(&self, id: &str) -> Result<LockScope, BridgeError> {
        let reg = self.registry.lock();
        let rec = reg.get(id)?;
        let root = reg.root_ancestor(rec);
        Ok(LockScope {
            owner: root.thunk.id.clone(),
            keys: root.thunk.keys.clone(),
            bypass: rec.thunk.bypass_lock,
        })
    }

    /// Another handle on a thunk's final outcome.
    pub fn wait(&self, id: &str) -> Result<ThunkHandle, BridgeError> {
        let (tx, rx) = oneshot::channel();
        let mut reg = self.registry.lock();
        let rec = reg.get_mut(id)?;
        match &rec.outcome {
            Some(outcome) => {
                let _ = tx.send(outcome.clone());
            }
            None => rec.waiters.push(tx),
        }
        Ok(ThunkHandle::new(id.to_string(), rx))
    }

    /// Number of registered (not yet evicted) thunks.
    pub fn len(&self) -> usize {
        self.registry.lock().thunks.len()
    }

    /// True if no thunk is registered.
    pub fn is_empty(&self) -> bool {
        self.registry.lock().thunks.is_empty()
    }

    fn update_settled(self: &Arc<Self>, thunk_id: &str) {
        if self.updates.has_pending(Some(thunk_id)) {
            return;
        }
        let (ready, evict) = {
            let mut reg = self.registry.lock();
            let Some(rec) = reg.thunks.get_mut(thunk_id) else {
                return;
            };
            let evict = rec.thunk.state.is_terminal() && std::mem::take(&mut rec.eviction_deferred);
            (reg.ready_to_finalize(thunk_id), evict)
        };
        if ready {
            self.finalize_thunk_completion(thunk_id);
        } else if evict {
            self.schedule_eviction(thunk_id);
        }
    }

    /// Finalizes `id` if completion was requested and nothing is outstanding.
    fn try_finalize(self: &Arc<Self>, id: &str) -> bool {
        let ready = self.registry.lock().ready_to_finalize(id);
        if ready && !self.updates.has_pending(Some(id)) {
            self.finalize_thunk_completion(id);
            true
        } else {
            false
        }
    }

    /// True (and marks the record) if new updates appeared after finalization.
    fn defer_eviction(&self, id: &str) -> bool {
        if !self.updates.has_pending(Some(id)) {
            return false;
        }
        if let Some(rec) = self.registry.lock().thunks.get_mut(id) {
            rec.eviction_deferred = true;
        }
        tracing::debug!(thunk = id, "eviction deferred");
        true
    }

    fn schedule_eviction(self: &Arc<Self>, id: &str) {
        let me = Arc::clone(self);
        let id = id.to_string();
        tokio::spawn(async move {
            // Lets updates tracked in the same tick land first.
            tokio::task::yield_now().await;
            if me.defer_eviction(&id) {
                return;
            }
            if !me.eviction_grace.is_zero() {
                tokio::time::sleep(me.eviction_grace).await;
                if me.defer_eviction(&id) {
                    return;
                }
            }
            me.evict(&id);
        });
    }

    fn evict(&self, id: &str) {
        let removed = self.registry.lock().thunks.remove(id);
        if removed.is_some() {
            tracing::debug!(thunk = id, "thunk evicted");
            self.bus
                .publish(Event::new(EventKind::ThunkEvicted).with_thunk(id));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locks::LockManager;
    use crate::scheduler::Task;

    fn setup(grace: Duration) -> (Arc<ThunkManager>, Arc<TaskScheduler>) {
        let bus = Bus::new(256);
        let locks = Arc::new(LockManager::new(bus.clone()));
        let scheduler = TaskScheduler::new(locks, bus.clone());
        (ThunkManager::new(scheduler.clone(), bus, grace), scheduler)
    }

    #[tokio::test]
    async fn completion_waits_for_pending_actions() {
        let (thunks, _) = setup(Duration::ZERO);
        let handle = thunks.register_thunk(ThunkSpec::new("A", 1)).expect("register");
        thunks.execute_thunk("A").expect("execute");
        thunks.track_action("A", "a1").expect("track");

        thunks.complete_thunk("A", None).expect("complete");
        assert_eq!(thunks.get("A").expect("A").state, ThunkState::Executing);
        assert_eq!(thunks.get_pending_actions("A").expect("pending"), vec!["a1"]);

        thunks.action_settled("A", "a1");
        assert_eq!(thunks.get("A").expect("A").state, ThunkState::Completed);
        assert_eq!(handle.wait().await, ThunkOutcome::Completed(None));
    }

    #[tokio::test]
    async fn completion_waits_for_acknowledgements() {
        let (thunks, _) = setup(Duration::ZERO);
        let handle = thunks.register_thunk(ThunkSpec::new("A", 1)).expect("register");
        thunks.execute_thunk("A").expect("execute");
        thunks.track_state_update("u1", "A", [1, 2]);

        thunks.complete_thunk("A", Some(serde_json::json!(42))).expect("complete");
        assert_eq!(thunks.get("A").expect("A").state, ThunkState::Executing);

        assert!(thunks.acknowledge_state_update("u1", 1));
        assert_eq!(thunks.get("A").expect("A").state, ThunkState::Executing);
        assert!(thunks.acknowledge_state_update("u1", 2));
        assert_eq!(
            handle.wait().await,
            ThunkOutcome::Completed(Some(serde_json::json!(42)))
        );
        // Duplicate acknowledgements are stale and succeed.
        assert!(thunks.acknowledge_state_update("u1", 2));
    }

    #[tokio::test]
    async fn dead_renderer_unblocks_completion() {
        let (thunks, _) = setup(Duration::ZERO);
        thunks.register_thunk(ThunkSpec::new("A", 1)).expect("register");
        thunks.execute_thunk("A").expect("execute");
        thunks.track_state_update("u1", "A", [1, 2]);
        thunks.complete_thunk("A", None).expect("complete");
        thunks.acknowledge_state_update("u1", 1);

        assert!(thunks.cleanup_dead_renderer(2));
        assert!(!thunks.has_pending_state_updates(Some("A")));
        assert_eq!(thunks.get("A").expect("A").state, ThunkState::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_updates_unblock_completion() {
        let (thunks, _) = setup(Duration::ZERO);
        thunks.register_thunk(ThunkSpec::new("A", 1)).expect("register");
        thunks.execute_thunk("A").expect("execute");
        thunks.track_state_update("u1", "A", [1, 2]);
        thunks.acknowledge_state_update("u1", 1);
        thunks.complete_thunk("A", None).expect("complete");

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(thunks.cleanup_expired_updates(Duration::from_secs(30)), 1);
        assert!(!thunks.has_pending_state_updates(None));
        assert_eq!(thunks.get("A").expect("A").state, ThunkState::Completed);
    }

    #[tokio::test]
    async fn first_executing_thunk_becomes_root() {
        let (thunks, _) = setup(Duration::ZERO);
        thunks
            .register_thunk(ThunkSpec::new("A", 1).with_keys(["counter"]))
            .expect("A");
        thunks
            .register_thunk(ThunkSpec::new("A.1", 1).with_parent("A"))
            .expect("child");
        thunks
            .register_thunk(ThunkSpec::new("B", 2).with_keys(["theme"]))
            .expect("B");

        thunks.execute_thunk("A").expect("execute A");
        thunks.execute_thunk("A.1").expect("execute child");
        thunks.execute_thunk("B").expect("execute B");
        assert_eq!(thunks.root_thunk().as_deref(), Some("A"));

        thunks.complete_thunk("A.1", None).expect("complete child");
        thunks.complete_thunk("A", None).expect("complete");
        assert_eq!(thunks.root_thunk(), None);
        assert!(thunks.get("A").expect("A").children.contains("A.1"));
    }

    #[tokio::test]
    async fn root_thunk_takes_its_lock_on_execution() {
        let (thunks, scheduler) = setup(Duration::ZERO);
        thunks
            .register_thunk(ThunkSpec::new("A", 1).with_keys(["user"]))
            .expect("A");
        thunks
            .register_thunk(ThunkSpec::new("A.1", 1).with_parent("A"))
            .expect("child");
        thunks
            .register_thunk(ThunkSpec::new("B", 2).with_keys(["user.name"]))
            .expect("B");

        thunks.execute_thunk("A").expect("execute A");
        assert!(scheduler.locks().holds("A"));
        thunks.execute_thunk("A.1").expect("child runs under A");
        assert!(!scheduler.locks().holds("A.1"));

        match thunks.execute_thunk("B") {
            Err(BridgeError::Locked(conflict)) => assert_eq!(conflict.holder, "A"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(thunks.get("B").expect("B").state, ThunkState::Pending);

        thunks.complete_thunk("A.1", None).expect("complete child");
        thunks.complete_thunk("A", None).expect("complete");
        assert!(!scheduler.locks().holds("A"));
        thunks.execute_thunk("B").expect("execute B");
        assert!(scheduler.locks().holds("B"));
    }

    #[tokio::test]
    async fn execute_when_unlocked_waits_for_release() {
        let (thunks, scheduler) = setup(Duration::ZERO);
        thunks.register_thunk(ThunkSpec::new("A", 1)).expect("A");
        thunks.register_thunk(ThunkSpec::new("B", 2)).expect("B");
        thunks.execute_thunk("A").expect("execute A");

        let waiter = {
            let thunks = thunks.clone();
            tokio::spawn(async move { thunks.execute_when_unlocked("B").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        thunks.complete_thunk("A", None).expect("complete");
        waiter.await.expect("join").expect("executed");
        assert_eq!(thunks.get("B").expect("B").state, ThunkState::Executing);
        assert!(scheduler.locks().holds("B"));
    }

    #[tokio::test]
    async fn parent_completion_waits_for_children() {
        let (thunks, scheduler) = setup(Duration::ZERO);
        let parent = thunks
            .register_thunk(ThunkSpec::new("P", 1).with_keys(["counter"]))
            .expect("P");
        thunks.execute_thunk("P").expect("execute P");
        thunks
            .register_thunk(ThunkSpec::new("C", 1).with_parent("P"))
            .expect("C");
        thunks.execute_thunk("C").expect("execute C");

        thunks.complete_thunk("P", None).expect("complete P");
        assert_eq!(thunks.get("P").expect("P").state, ThunkState::Executing);
        assert!(scheduler.locks().holds("P"));

        thunks.complete_thunk("C", None).expect("complete C");
        assert_eq!(parent.wait().await, ThunkOutcome::Completed(None));
        assert!(scheduler.locks().is_empty());
    }

    #[tokio::test]
    async fn child_of_finished_parent_is_rejected() {
        let (thunks, _) = setup(Duration::from_secs(60));
        thunks.register_thunk(ThunkSpec::new("P", 1)).expect("P");
        thunks.execute_thunk("P").expect("execute");
        thunks.complete_thunk("P", None).expect("complete");

        assert!(matches!(
            thunks.register_thunk(ThunkSpec::new("C", 1).with_parent("P")),
            Err(BridgeError::InvalidTransition { from: "completed", .. })
        ));
    }

    #[tokio::test]
    async fn failing_parent_fails_live_children() {
        let (thunks, scheduler) = setup(Duration::ZERO);
        thunks
            .register_thunk(ThunkSpec::new("P", 1).with_keys(["counter"]))
            .expect("P");
        thunks.execute_thunk("P").expect("execute P");
        let child = thunks
            .register_thunk(ThunkSpec::new("C", 1).with_parent("P"))
            .expect("C");
        let grandchild = thunks
            .register_thunk(ThunkSpec::new("G", 1).with_parent("C"))
            .expect("G");
        thunks.execute_thunk("C").expect("execute C");

        thunks.fail_thunk("P", "boom").expect("fail");
        assert!(matches!(child.wait().await, ThunkOutcome::Failed(msg) if msg.contains("boom")));
        assert!(matches!(grandchild.wait().await, ThunkOutcome::Failed(_)));
        assert!(scheduler.locks().is_empty());
        assert!(thunks.get_active_thunks_summary().thunks.is_empty());
    }

    #[tokio::test]
    async fn unreached_recipient_no_longer_blocks_completion() {
        let (thunks, _) = setup(Duration::ZERO);
        let handle = thunks.register_thunk(ThunkSpec::new("A", 1)).expect("register");
        thunks.execute_thunk("A").expect("execute");
        thunks.track_state_update("u1", "A", [1, 2]);
        assert!(thunks.acknowledge_state_update("u1", 1));
        thunks.complete_thunk("A", None).expect("complete");

        let summary = thunks.get_active_thunks_summary();
        assert_eq!(summary.thunks[0].pending_updates, 1);

        thunks.drop_update_recipient("u1", 2);
        assert_eq!(handle.wait().await, ThunkOutcome::Completed(None));
    }

    #[tokio::test]
    async fn nested_thunks_share_root_lock_scope() {
        let (thunks, _) = setup(Duration::ZERO);
        thunks
            .register_thunk(ThunkSpec::new("A", 1).with_keys(["counter"]))
            .expect("A");
        thunks
            .register_thunk(ThunkSpec::new("A.1", 1).with_parent("A").bypassing_lock())
            .expect("child");

        let scope = thunks.lock_scope("A.1").expect("scope");
        assert_eq!(scope.owner, "A");
        assert_eq!(scope.keys, Some(vec!["counter".to_string()]));
        assert!(scope.bypass);
    }

    #[tokio::test]
    async fn transitions_are_monotonic() {
        let (thunks, _) = setup(Duration::ZERO);
        thunks.register_thunk(ThunkSpec::new("A", 1)).expect("register");
        assert_eq!(
            thunks.register_thunk(ThunkSpec::new("A", 1)).map(|h| h.id().to_string()),
            Err(BridgeError::DuplicateThunk { id: "A".into() })
        );
        thunks.execute_thunk("A").expect("execute");
        assert!(matches!(
            thunks.execute_thunk("A"),
            Err(BridgeError::InvalidTransition { .. })
        ));
        thunks.fail_thunk("A", "boom").expect("fail");
        assert!(matches!(
            thunks.complete_thunk("A", None),
            Err(BridgeError::InvalidTransition { from: "failed", .. })
        ));
        assert_eq!(
            thunks.execute_thunk("missing"),
            Err(BridgeError::UnknownThunk {
                id: "missing".into()
            })
        );
    }

    #[tokio::test]
    async fn fail_purges_queued_tasks_and_releases_lock() {
        let (thunks, scheduler) = setup(Duration::ZERO);
        let handle = thunks.register_thunk(ThunkSpec::new("A", 1)).expect("register");
        thunks.execute_thunk("A").expect("execute");

        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let g = gate.clone();
        let first = scheduler.enqueue(Task::new("a1", "A", move || async move {
            let _ = g.acquire().await;
            Ok(())
        }));
        let second = scheduler.enqueue(Task::new("a2", "A", || async { Ok(()) }));
        assert_eq!(scheduler.get_queue_status().queued_tasks, 1);

        thunks.fail_thunk("A", "boom").expect("fail");
        assert_eq!(scheduler.get_queue_status().queued_tasks, 0);
        assert!(!scheduler.locks().holds("A"));
        assert_eq!(handle.wait().await, ThunkOutcome::Failed("boom".into()));
        assert!(second.wait().await.is_err());

        gate.add_permits(1);
        assert!(first.wait().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn eviction_follows_grace_period() {
        let (thunks, _) = setup(Duration::from_millis(500));
        thunks.register_thunk(ThunkSpec::new("A", 1)).expect("register");
        thunks.execute_thunk("A").expect("execute");
        thunks.complete_thunk("A", None).expect("complete");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(thunks.get("A").is_some());
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(thunks.get("A").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn late_update_defers_eviction() {
        let (thunks, _) = setup(Duration::from_millis(500));
        thunks.register_thunk(ThunkSpec::new("A", 1)).expect("register");
        thunks.execute_thunk("A").expect("execute");
        thunks.complete_thunk("A", None).expect("complete");
        // Lands in the same tick as finalization.
        thunks.track_state_update("u1", "A", [1]);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(thunks.get("A").is_some());

        thunks.acknowledge_state_update("u1", 1);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(thunks.get("A").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_old_terminal_thunks() {
        let (thunks, _) = setup(Duration::from_secs(3600));
        thunks.register_thunk(ThunkSpec::new("A", 1)).expect("A");
        thunks.register_thunk(ThunkSpec::new("B", 1)).expect("B");
        thunks.execute_thunk("A").expect("execute");
        thunks.complete_thunk("A", None).expect("complete");

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(thunks.sweep(Duration::from_secs(300)), 1);
        assert!(thunks.get("A").is_none());
        assert!(thunks.get("B").is_some());

        let summary = thunks.get_active_thunks_summary();
        assert_eq!(summary.thunks.len(), 1);
        assert_eq!(summary.thunks[0].id, "B");
    }
}
