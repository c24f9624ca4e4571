//! Error types used by the bridge core.
//!
//! - [`BridgeError`]: programmer errors raised immediately by the API that detected them.
//! - [`LockConflict`]: refused lock acquisition (recoverable, retry or queue).
//! - [`ActionError`]: failure of a single action, always returned as a value.
//! - [`BatchError`]: per-item outcome of a failed batch submission.
//! - [`TaskError`]: failure of a scheduled task handler.
//!
//! Every type provides `as_label` (stable snake_case label for logs/metrics).

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// # Errors raised by the host-facing API.
///
/// These represent misuse (unknown ids, invalid transitions), not runtime
/// failures of actions.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// The referenced thunk was never registered (or was already evicted).
    #[error("unknown thunk {id}")]
    UnknownThunk {
        /// Thunk id as given by the caller.
        id: String,
    },

    /// A thunk with the same id is already registered.
    #[error("thunk {id} is already registered")]
    DuplicateThunk {
        /// Thunk id as given by the caller.
        id: String,
    },

    /// The requested state transition is not allowed (states are monotonic).
    #[error("thunk {id}: invalid transition {from} -> {to}")]
    InvalidTransition {
        /// Thunk id.
        id: String,
        /// Current state.
        from: &'static str,
        /// Requested state.
        to: &'static str,
    },

    /// A root thunk could not take its lock entry: an overlapping thunk holds one.
    #[error(transparent)]
    Locked(#[from] LockConflict),

    /// The bridge has been shut down.
    #[error("bridge is shut down")]
    Closed,
}

impl BridgeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BridgeError::UnknownThunk { .. } => "bridge_unknown_thunk",
            BridgeError::DuplicateThunk { .. } => "bridge_duplicate_thunk",
            BridgeError::InvalidTransition { .. } => "bridge_invalid_transition",
            BridgeError::Locked(_) => "bridge_locked",
            BridgeError::Closed => "bridge_closed",
        }
    }
}

/// Lock acquisition was refused because another active entry overlaps.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("lock for {requested} conflicts with {holder} (keys: {})", describe_keys(.holder_keys))]
pub struct LockConflict {
    /// Thunk that asked for the lock.
    pub requested: String,
    /// Thunk currently holding the overlapping entry.
    pub holder: String,
    /// Key scope of the holder (`None` = global).
    pub holder_keys: Option<Vec<String>>,
}

impl LockConflict {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        "lock_conflict"
    }
}

fn describe_keys(keys: &Option<Vec<String>>) -> String {
    match keys {
        None => "*".to_string(),
        Some(keys) => keys.join(","),
    }
}

/// Where an action failure happened relative to the adapter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The adapter failed while the call was still on the stack.
    Sync,
    /// The adapter's asynchronous completion failed.
    Async,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Sync => f.write_str("sync"),
            Phase::Async => f.write_str("async"),
        }
    }
}

/// # Failure of a single action.
///
/// Returned as part of the action's result, never thrown past the router.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// The state adapter rejected the action or its handler failed.
    #[error("action {action_type} failed in {adapter} adapter ({phase}) after {elapsed:?}: {message}")]
    Processing {
        /// Action type.
        action_type: String,
        /// Adapter kind reported by [`StateAdapter::kind`](crate::StateAdapter::kind).
        adapter: &'static str,
        /// Whether the failure happened synchronously or inside the async completion.
        phase: Phase,
        /// Time spent until the failure surfaced.
        elapsed: Duration,
        /// Underlying error message.
        message: String,
    },

    /// A middleware vetoed the action before it reached the adapter.
    #[error("action {action_type} rejected by middleware {middleware}")]
    Rejected {
        /// Action type.
        action_type: String,
        /// Name of the vetoing middleware.
        middleware: &'static str,
    },

    /// The action's task was removed from the queue before it started.
    #[error("action {action_id} cancelled before it started")]
    Canceled {
        /// Action id.
        action_id: String,
    },

    /// The scheduled task running the action failed outside the adapter.
    #[error("task for action {action_id} failed: {error}")]
    Task {
        /// Action id.
        action_id: String,
        /// Task failure message.
        error: String,
    },
}

impl ActionError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ActionError::Processing { phase: Phase::Sync, .. } => "action_failed_sync",
            ActionError::Processing { phase: Phase::Async, .. } => "action_failed_async",
            ActionError::Rejected { .. } => "action_rejected",
            ActionError::Canceled { .. } => "action_canceled",
            ActionError::Task { .. } => "action_task_failed",
        }
    }
}

/// # Per-item failure of a batched submission.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BatchError {
    /// The whole batch failed to cross the transport.
    #[error("batch {batch_id} transport failed: {message}")]
    Transport {
        /// Batch id.
        batch_id: String,
        /// Transport error message.
        message: String,
    },

    /// The response did not contain an entry for this action.
    #[error("no result received for action {action_id}")]
    MissingResult {
        /// Action id.
        action_id: String,
    },

    /// The receiving side reported failure for this action.
    #[error("action {action_id} failed: {message}")]
    Failed {
        /// Action id.
        action_id: String,
        /// Error reported by the receiver.
        message: String,
    },

    /// The batcher was destroyed while the action was still queued.
    #[error("batcher shut down")]
    Shutdown,
}

impl BatchError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            BatchError::Transport { .. } => "batch_transport_failed",
            BatchError::MissingResult { .. } => "batch_missing_result",
            BatchError::Failed { .. } => "batch_action_failed",
            BatchError::Shutdown => "batch_shutdown",
        }
    }
}

/// # Errors produced by scheduled task handlers.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Handler returned an error.
    #[error("execution failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// Handler panicked; the panic was caught at the task boundary.
    #[error("handler panicked: {info}")]
    Panicked {
        /// Panic payload rendered as text.
        info: String,
    },

    /// Task was removed from the queue before it started.
    #[error("task cancelled before start")]
    Canceled,
}

impl TaskError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fail { .. } => "task_failed",
            TaskError::Panicked { .. } => "task_panicked",
            TaskError::Canceled => "task_canceled",
        }
    }
}
