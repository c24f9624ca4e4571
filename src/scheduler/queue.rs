//! # Conflict-aware task scheduler.
//!
//! Owns a stable priority queue of pending tasks and the set of running ones.
//! Before a task starts, the scheduler consults the [`LockManager`] for its
//! lock owner's key scope.
//!
//! ## Flow
//! ```text
//! enqueue(task) ──► queue (priority desc, created asc) ──► process_queue()
//!
//! process_queue():  one pass over the queue
//!   for task in queue:
//!     ├─ has_conflicts? ─► stay queued
//!     └─ otherwise      ─► acquire lock owner (unless held), move to running, spawn handler
//!
//! handler settles ──► leave running set ──► (ephemeral lock released)
//!                 ──► TaskCompleted / TaskFailed ──► process_queue()
//! ```
//!
//! ## Rules
//! - Started tasks leave the queue immediately, so tasks further down the same
//!   pass already see them as running.
//! - Concurrent (bypass) tasks never conflict.
//! - At most one non-concurrent task per thunk is in flight, so a thunk's
//!   actions apply in submission order.
//! - Key precision comes from the lock manager: a task conflicts when its lock
//!   owner cannot acquire its scope. Root thunks already hold their entry from
//!   execution on, so in practice only free actions acquire here.
//! - Handler errors and panics are caught at the task boundary; the queue keeps going.
//! - Running tasks are never cancelled; `remove_tasks` only purges the queue.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::task::{Task, TaskHandle};
use crate::error::TaskError;
use crate::events::{Bus, Event, EventKind};
use crate::locks::LockManager;

type Responder = oneshot::Sender<Result<(), TaskError>>;

/// Snapshot returned by [`TaskScheduler::get_queue_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    /// Tasks waiting to start.
    pub queued_tasks: usize,
    /// Tasks whose handler is in flight.
    pub running_tasks: usize,
    /// Priority of the head of the queue.
    pub highest_priority_queued: Option<i32>,
    /// Nothing queued and nothing running.
    pub is_idle: bool,
}

struct QueuedTask {
    task: Task,
    responder: Responder,
}

struct RunningTask {
    thunk_id: String,
    lock_owner: String,
    can_run_concurrently: bool,
    ephemeral_lock: bool,
}

#[derive(Default)]
struct SchedulerState {
    queue: Vec<QueuedTask>,
    running: HashMap<String, RunningTask>,
}

/// Priority queue plus running set, gated by the lock manager.
pub struct TaskScheduler {
    state: Mutex<SchedulerState>,
    locks: Arc<LockManager>,
    bus: Bus,
}

impl TaskScheduler {
    /// Creates a scheduler. The lock manager must be constructed first.
    pub fn new(locks: Arc<LockManager>, bus: Bus) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SchedulerState::default()),
            locks,
            bus,
        })
    }

    /// Lock manager consulted by this scheduler.
    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }

    /// Adds a task to the queue and runs a scheduling pass.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(self: &Arc<Self>, task: Task) -> TaskHandle {
        let (tx, rx) = oneshot::channel();
        let handle = TaskHandle::new(task.id.clone(), rx);
        let event = Event::new(EventKind::TaskQueued)
            .with_task(task.id.as_str())
            .with_thunk(task.thunk_id.as_str());
        {
            let mut st = self.state.lock();
            st.queue.push(QueuedTask {
                task,
                responder: tx,
            });
            // Stable sort: priority desc, then creation order.
            st.queue
                .sort_by_key(|q| (Reverse(q.task.priority), q.task.created_at, q.task.seq));
        }
        self.bus.publish(event);
        self.process_queue();
        handle
    }

    /// Runs one scheduling pass, starting every queued task without conflicts.
    ///
    /// Idempotent: with nothing startable it changes nothing. Passes are
    /// serialized by the state mutex and handlers are spawned only after the
    /// pass released it, so a pass never re-enters itself.
    pub fn process_queue(self: &Arc<Self>) {
        let started = {
            let mut st = self.state.lock();
            self.start_ready(&mut st)
        };
        for queued in started {
            self.spawn(queued);
        }
    }

    /// True if `task` could not start right now.
    pub fn has_conflicts(&self, task: &Task) -> bool {
        let st = self.state.lock();
        self.conflicts(&st.running, task)
    }

    /// Current queue/running counts.
    pub fn get_queue_status(&self) -> QueueStatus {
        let st = self.state.lock();
        QueueStatus {
            queued_tasks: st.queue.len(),
            running_tasks: st.running.len(),
            highest_priority_queued: st.queue.first().map(|q| q.task.priority),
            is_idle: st.queue.is_empty() && st.running.is_empty(),
        }
    }

    /// Purges queued (not started) tasks of `thunk_id`. Their handles resolve
    /// as cancelled. Returns the number of purged tasks.
    pub fn remove_tasks(&self, thunk_id: &str) -> usize {
        let removed: Vec<QueuedTask> = {
            let mut st = self.state.lock();
            let (removed, kept) = std::mem::take(&mut st.queue)
                .into_iter()
                .partition(|q| q.task.thunk_id == thunk_id);
            st.queue = kept;
            removed
        };
        let n = removed.len();
        if n > 0 {
            tracing::debug!(thunk = thunk_id, count = n, "queued tasks removed");
            self.bus.publish(
                Event::new(EventKind::TasksRemoved)
                    .with_thunk(thunk_id)
                    .with_count(n),
            );
        }
        n
    }

    /// Releases `owner`'s lock entry and lets blocked tasks advance.
    pub fn release_lock(self: &Arc<Self>, owner: &str) -> bool {
        let released = self.locks.release(owner);
        self.process_queue();
        released
    }

    /// Number of running tasks belonging to `thunk_id`.
    pub fn running_for(&self, thunk_id: &str) -> usize {
        self.state
            .lock()
            .running
            .values()
            .filter(|r| r.thunk_id == thunk_id)
            .count()
    }

    fn conflicts(&self, running: &HashMap<String, RunningTask>, task: &Task) -> bool {
        if task.can_run_concurrently {
            return false;
        }
        let same_thunk_in_flight = running
            .values()
            .any(|r| !r.can_run_concurrently && r.thunk_id == task.thunk_id);
        if same_thunk_in_flight {
            return true;
        }
        if self.locks.holds(&task.lock_owner) {
            return false;
        }
        !self
            .locks
            .can_acquire(&task.lock_owner, task.keys.as_deref(), false)
    }

    fn start_ready(&self, st: &mut SchedulerState) -> Vec<QueuedTask> {
        let mut started = Vec::new();
        let mut i = 0;
        while i < st.queue.len() {
            if self.conflicts(&st.running, &st.queue[i].task) {
                i += 1;
                continue;
            }
            let task = &st.queue[i].task;
            if !self.locks.holds(&task.lock_owner) {
                let acquired = self.locks.acquire(
                    &task.lock_owner,
                    task.keys.as_deref(),
                    task.can_run_concurrently,
                );
                if acquired.is_err() {
                    i += 1;
                    continue;
                }
            }

            let queued = st.queue.remove(i);
            st.running.insert(
                queued.task.id.clone(),
                RunningTask {
                    thunk_id: queued.task.thunk_id.clone(),
                    lock_owner: queued.task.lock_owner.clone(),
                    can_run_concurrently: queued.task.can_run_concurrently,
                    ephemeral_lock: queued.task.ephemeral_lock,
                },
            );
            started.push(queued);
        }
        started
    }

    fn spawn(self: &Arc<Self>, queued: QueuedTask) {
        let QueuedTask { task, responder } = queued;
        let Task {
            id,
            thunk_id,
            handler,
            ..
        } = task;

        self.bus.publish(
            Event::new(EventKind::TaskStarted)
                .with_task(id.as_str())
                .with_thunk(thunk_id.as_str()),
        );

        let me = Arc::clone(self);
        tokio::spawn(async move {
            let started = Instant::now();
            let res = match std::panic::AssertUnwindSafe(async move { handler().await })
                .catch_unwind()
                .await
            {
                Ok(res) => res,
                Err(panic) => Err(TaskError::Panicked {
                    info: panic_message(&*panic),
                }),
            };
            me.settle(&id, &thunk_id, res, started, responder);
        });
    }

    fn settle(
        self: &Arc<Self>,
        id: &str,
        thunk_id: &str,
        res: Result<(), TaskError>,
        started: Instant,
        responder: Responder,
    ) {
        let finished = self.state.lock().running.remove(id);
        if let Some(r) = finished.filter(|r| r.ephemeral_lock) {
            self.locks.release(&r.lock_owner);
        }

        match &res {
            Ok(()) => self.bus.publish(
                Event::new(EventKind::TaskCompleted)
                    .with_task(id)
                    .with_thunk(thunk_id)
                    .with_duration(started.elapsed()),
            ),
            Err(e) => {
                tracing::debug!(task = id, thunk = thunk_id, error = %e, "task failed");
                self.bus.publish(
                    Event::new(EventKind::TaskFailed)
                        .with_task(id)
                        .with_thunk(thunk_id)
                        .with_reason(e.to_string()),
                );
            }
        }

        let _ = responder.send(res);
        self.process_queue();
    }
}

fn panic_message(any: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = any.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = any.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    fn keys(k: &[&str]) -> Option<Vec<String>> {
        Some(k.iter().map(|s| s.to_string()).collect())
    }

    fn scheduler() -> Arc<TaskScheduler> {
        let bus = Bus::new(256);
        TaskScheduler::new(Arc::new(LockManager::new(bus.clone())), bus)
    }

    fn gate() -> Arc<Semaphore> {
        Arc::new(Semaphore::new(0))
    }

    /// Task that blocks until one permit is added to `gate`.
    fn gated(id: &str, thunk: &str, scope: Option<Vec<String>>, gate: Arc<Semaphore>) -> Task {
        Task::new(id, thunk, move || async move {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
            Ok(())
        })
        .with_keys(scope)
    }

    async fn settle_a_bit() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn disjoint_thunks_run_concurrently() {
        let sched = scheduler();
        let gate = gate();

        let a = sched.enqueue(gated("a1", "A", keys(&["counter"]), gate.clone()));
        let b = sched.enqueue(gated("b1", "B", keys(&["theme"]), gate.clone()));

        let status = sched.get_queue_status();
        assert_eq!(status.running_tasks, 2);
        assert_eq!(status.queued_tasks, 0);

        gate.add_permits(2);
        assert!(a.wait().await.is_ok());
        assert!(b.wait().await.is_ok());
    }

    #[tokio::test]
    async fn overlapping_thunks_wait_for_lock_release() {
        let sched = scheduler();
        let gate = gate();

        let a = sched.enqueue(gated("a1", "A", keys(&["counter"]), gate.clone()));
        let b = sched.enqueue(gated("b1", "B", None, gate.clone()));
        assert_eq!(sched.get_queue_status().running_tasks, 1);
        assert_eq!(sched.get_queue_status().queued_tasks, 1);

        gate.add_permits(1);
        a.wait().await.expect("a");
        settle_a_bit().await;
        // A still holds its lock: the task finished but the thunk did not.
        assert_eq!(sched.get_queue_status().queued_tasks, 1);

        assert!(sched.release_lock("A"));
        assert_eq!(sched.get_queue_status().running_tasks, 1);
        gate.add_permits(1);
        b.wait().await.expect("b");
    }

    #[tokio::test]
    async fn one_task_per_thunk_in_flight() {
        let sched = scheduler();
        let gate = gate();

        let first = sched.enqueue(gated("a1", "A", keys(&["counter"]), gate.clone()));
        let second = sched.enqueue(gated("a2", "A", keys(&["counter"]), gate.clone()));
        assert_eq!(sched.running_for("A"), 1);
        assert_eq!(sched.get_queue_status().queued_tasks, 1);

        gate.add_permits(1);
        first.wait().await.expect("first");
        settle_a_bit().await;
        assert_eq!(sched.running_for("A"), 1);
        assert_eq!(sched.get_queue_status().queued_tasks, 0);

        gate.add_permits(1);
        second.wait().await.expect("second");
        settle_a_bit().await;
        assert_eq!(sched.running_for("A"), 0);
    }

    #[tokio::test]
    async fn queue_is_ordered_by_priority_then_fifo() {
        let sched = scheduler();
        let gate = gate();
        let order = Arc::new(Mutex::new(Vec::new()));

        // Blocker holds the global lock while the others queue up.
        let blocker = sched.enqueue(gated("block", "G", None, gate.clone()));
        let mut handles = Vec::new();
        for (id, prio) in [("low", 0), ("high-1", 10), ("high-2", 10), ("mid", 5)] {
            let order = order.clone();
            let task = Task::new(id, "T", move || async move {
                order.lock().push(id);
                Ok(())
            })
            .with_priority(prio);
            handles.push(sched.enqueue(task));
        }
        assert_eq!(sched.get_queue_status().highest_priority_queued, Some(10));

        gate.add_permits(1);
        blocker.wait().await.expect("blocker");
        sched.release_lock("G");
        for h in handles {
            h.wait().await.expect("task");
        }
        assert_eq!(*order.lock(), vec!["high-1", "high-2", "mid", "low"]);
    }

    #[tokio::test]
    async fn concurrent_tasks_never_conflict() {
        let sched = scheduler();
        let gate = gate();

        let global = sched.enqueue(gated("g1", "G", None, gate.clone()));
        let admin =
            sched.enqueue(Task::new("admin", "ADMIN", || async { Ok(()) }).concurrent(true));
        assert!(admin.wait().await.is_ok());

        gate.add_permits(1);
        assert!(global.wait().await.is_ok());
    }

    #[tokio::test]
    async fn failures_and_panics_do_not_stop_the_queue() {
        let sched = scheduler();

        let failing = sched.enqueue(
            Task::new("f", "F", || async {
                Err(TaskError::Fail {
                    error: "boom".into(),
                })
            })
            .with_ephemeral_lock(),
        );
        let panicking = sched.enqueue(
            Task::new("p", "P", || async {
                let explode = true;
                if explode {
                    panic!("handler exploded");
                }
                Ok(())
            })
            .with_ephemeral_lock(),
        );
        let fine = sched.enqueue(Task::new("ok", "OK", || async { Ok(()) }).with_ephemeral_lock());

        assert!(matches!(failing.wait().await, Err(TaskError::Fail { .. })));
        assert!(matches!(
            panicking.wait().await,
            Err(TaskError::Panicked { .. })
        ));
        assert!(fine.wait().await.is_ok());
        settle_a_bit().await;
        assert!(sched.get_queue_status().is_idle);
        assert!(sched.locks().is_empty());
    }

    #[tokio::test]
    async fn remove_tasks_purges_only_queued() {
        let sched = scheduler();
        let gate = gate();

        let running = sched.enqueue(gated("a1", "A", keys(&["counter"]), gate.clone()));
        let queued = sched.enqueue(gated("a2", "A", keys(&["counter"]), gate.clone()));

        assert_eq!(sched.remove_tasks("A"), 1);
        assert_eq!(queued.wait().await, Err(TaskError::Canceled));

        gate.add_permits(1);
        assert!(running.wait().await.is_ok());
    }

    #[tokio::test]
    async fn has_conflicts_reflects_running_set() {
        let sched = scheduler();
        let gate = gate();
        let a = sched.enqueue(gated("a1", "A", keys(&["counter"]), gate.clone()));

        let same = Task::new("a2", "A", || async { Ok(()) }).with_keys(keys(&["counter"]));
        let other = Task::new("b1", "B", || async { Ok(()) }).with_keys(keys(&["theme"]));
        let overlapping = Task::new("c1", "C", || async { Ok(()) }).with_keys(keys(&["counter"]));
        assert!(sched.has_conflicts(&same));
        assert!(!sched.has_conflicts(&other));
        assert!(sched.has_conflicts(&overlapping));

        gate.add_permits(1);
        assert!(a.wait().await.is_ok());
    }
}
