//! # Scheduled unit of work.
//!
//! A [`Task`] wraps a one-shot closure that *creates* the future to run, plus
//! the metadata the scheduler orders and gates it by. The closure is only
//! invoked once the task leaves the queue.
//!
//! ```rust
//! use bridgevisor::Task;
//!
//! let t = Task::new("action-1", "thunk-1", || async { Ok(()) })
//!     .with_priority(5)
//!     .with_keys(Some(vec!["counter".to_string()]));
//! assert_eq!(t.priority, 5);
//! assert_eq!(t.lock_owner, "thunk-1");
//! ```

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::TaskError;

/// Global creation counter, the FIFO tie-breaker within a priority tier.
static TASK_SEQ: AtomicU64 = AtomicU64::new(0);

/// Boxed future produced by a task handler.
pub type TaskFuture = BoxFuture<'static, Result<(), TaskError>>;

type TaskHandler = Box<dyn FnOnce() -> TaskFuture + Send>;

/// Unit scheduled by the [`TaskScheduler`](crate::TaskScheduler).
pub struct Task {
    /// Task id (the action id for action tasks).
    pub id: String,
    /// Thunk the task belongs to; tasks of one thunk run one at a time.
    pub thunk_id: String,
    /// Lock entry the task runs under (root ancestor for nested thunks).
    pub lock_owner: String,
    /// Key scope requested for `lock_owner` (`None` = global).
    pub keys: Option<Vec<String>>,
    /// Higher runs first.
    pub priority: i32,
    /// Bypass tasks never conflict.
    pub can_run_concurrently: bool,
    /// Release `lock_owner` once this task settles.
    pub ephemeral_lock: bool,
    /// Creation time.
    pub created_at: Instant,
    pub(crate) seq: u64,
    pub(crate) handler: TaskHandler,
}

impl Task {
    /// Creates a task running `handler` under `thunk_id`'s lock.
    pub fn new<F, Fut>(id: impl Into<String>, thunk_id: impl Into<String>, handler: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let thunk_id = thunk_id.into();
        Self {
            id: id.into(),
            lock_owner: thunk_id.clone(),
            thunk_id,
            keys: None,
            priority: 0,
            can_run_concurrently: false,
            ephemeral_lock: false,
            created_at: Instant::now(),
            seq: TASK_SEQ.fetch_add(1, Ordering::Relaxed),
            handler: Box::new(move || handler().boxed()),
        }
    }

    /// Sets the priority.
    #[inline]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the key scope requested for the lock owner.
    #[inline]
    pub fn with_keys(mut self, keys: Option<Vec<String>>) -> Self {
        self.keys = keys;
        self
    }

    /// Runs the task under another thunk's lock entry.
    #[inline]
    pub fn with_lock_owner(mut self, owner: impl Into<String>) -> Self {
        self.lock_owner = owner.into();
        self
    }

    /// Marks the task as exempt from conflicts.
    #[inline]
    pub fn concurrent(mut self, can_run_concurrently: bool) -> Self {
        self.can_run_concurrently = can_run_concurrently;
        self
    }

    /// Releases the lock owner's entry when the task settles.
    #[inline]
    pub fn with_ephemeral_lock(mut self) -> Self {
        self.ephemeral_lock = true;
        self
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("thunk_id", &self.thunk_id)
            .field("lock_owner", &self.lock_owner)
            .field("keys", &self.keys)
            .field("priority", &self.priority)
            .field("can_run_concurrently", &self.can_run_concurrently)
            .finish_non_exhaustive()
    }
}

/// Deferred result of an enqueued task.
#[derive(Debug)]
pub struct TaskHandle {
    id: String,
    rx: oneshot::Receiver<Result<(), TaskError>>,
}

impl TaskHandle {
    pub(crate) fn new(id: String, rx: oneshot::Receiver<Result<(), TaskError>>) -> Self {
        Self { id, rx }
    }

    /// Task id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Waits for the task to settle; a task removed before it started
    /// resolves as [`TaskError::Canceled`].
    pub async fn wait(self) -> Result<(), TaskError> {
        self.rx.await.unwrap_or(Err(TaskError::Canceled))
    }
}
