//! Thunk records and their public views.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::actions::{ObserverId, State};

/// Which side initiated a thunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ThunkKind {
    /// Dispatched by the state owner itself.
    Owner,
    /// Dispatched by an observer across the transport.
    Observer,
}

/// Lifecycle state. Transitions only move forward:
/// `Pending → Executing → Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ThunkState {
    /// Registered, not yet executing.
    Pending,
    /// Activated.
    Executing,
    /// Finished and fully acknowledged.
    Completed,
    /// Finished with an error.
    Failed,
}

impl ThunkState {
    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThunkState::Pending => "pending",
            ThunkState::Executing => "executing",
            ThunkState::Completed => "completed",
            ThunkState::Failed => "failed",
        }
    }

    /// True for `Completed` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ThunkState::Completed | ThunkState::Failed)
    }
}

impl fmt::Display for ThunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration request for a thunk.
///
/// ```rust
/// use bridgevisor::{ThunkKind, ThunkSpec};
///
/// let spec = ThunkSpec::new("t1", 2).with_keys(["counter"]).observer_initiated();
/// assert_eq!(spec.kind, ThunkKind::Observer);
/// assert_eq!(spec.keys.as_deref(), Some(&["counter".to_string()][..]));
/// ```
#[derive(Debug, Clone)]
pub struct ThunkSpec {
    /// Unique id.
    pub id: String,
    /// Observer that started the thunk.
    pub source_observer_id: ObserverId,
    /// Initiating side.
    pub kind: ThunkKind,
    /// Enclosing thunk, for nested thunks.
    pub parent_id: Option<String>,
    /// Declared key scope (`None` = global).
    pub keys: Option<Vec<String>>,
    /// Exempt from lock and ordering constraints.
    pub bypass_lock: bool,
}

impl ThunkSpec {
    /// Owner-initiated, global, non-bypass thunk.
    pub fn new(id: impl Into<String>, source_observer_id: ObserverId) -> Self {
        Self {
            id: id.into(),
            source_observer_id,
            kind: ThunkKind::Owner,
            parent_id: None,
            keys: None,
            bypass_lock: false,
        }
    }

    /// Nests the thunk under `parent`.
    #[inline]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent_id = Some(parent.into());
        self
    }

    /// Declares the key scope.
    #[inline]
    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    /// Marks the thunk as bypassing locks.
    #[inline]
    pub fn bypassing_lock(mut self) -> Self {
        self.bypass_lock = true;
        self
    }

    /// Marks the thunk as observer-initiated.
    #[inline]
    pub fn observer_initiated(mut self) -> Self {
        self.kind = ThunkKind::Observer;
        self
    }
}

/// Snapshot of a registered thunk.
#[derive(Debug, Clone)]
pub struct Thunk {
    pub id: String,
    pub source_observer_id: ObserverId,
    pub kind: ThunkKind,
    pub parent_id: Option<String>,
    pub state: ThunkState,
    pub keys: Option<Vec<String>>,
    pub bypass_lock: bool,
    pub children: BTreeSet<String>,
    pub started_at: Instant,
    /// Failure message, set once the thunk failed.
    pub error: Option<String>,
}

impl Thunk {
    pub(crate) fn from_spec(spec: ThunkSpec) -> Self {
        Self {
            id: spec.id,
            source_observer_id: spec.source_observer_id,
            kind: spec.kind,
            parent_id: spec.parent_id,
            state: ThunkState::Pending,
            keys: spec.keys,
            bypass_lock: spec.bypass_lock,
            children: BTreeSet::new(),
            started_at: Instant::now(),
            error: None,
        }
    }
}

/// Lock scope an action of a thunk runs under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockScope {
    /// Lock entry owner: the thunk's root ancestor.
    pub owner: String,
    /// Key scope of the owner (`None` = global).
    pub keys: Option<Vec<String>>,
    /// Bypass flag of the thunk itself.
    pub bypass: bool,
}

/// One line of [`ThunkManager::get_active_thunks_summary`](crate::ThunkManager::get_active_thunks_summary).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThunkSummary {
    pub id: String,
    pub source_observer_id: ObserverId,
    pub parent_id: Option<String>,
    pub state: ThunkState,
    pub keys: Option<Vec<String>>,
    pub pending_actions: usize,
    /// State updates still waiting for an acknowledgement.
    pub pending_updates: usize,
}

/// Active (non-terminal) thunks plus the current root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveThunks {
    pub root: Option<String>,
    pub thunks: Vec<ThunkSummary>,
}

/// Final outcome delivered to thunk waiters.
#[derive(Debug, Clone, PartialEq)]
pub enum ThunkOutcome {
    /// Completed with an optional result value.
    Completed(Option<State>),
    /// Failed with an error message.
    Failed(String),
    /// Record dropped before reaching a terminal state.
    Evicted,
}

/// Waits for a thunk to reach a terminal state.
#[derive(Debug)]
pub struct ThunkHandle {
    id: String,
    rx: oneshot::Receiver<ThunkOutcome>,
}

impl ThunkHandle {
    pub(crate) fn new(id: String, rx: oneshot::Receiver<ThunkOutcome>) -> Self {
        Self { id, rx }
    }

    /// Thunk id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Resolves once the thunk is finalized (completed and acknowledged) or failed.
    pub async fn wait(self) -> ThunkOutcome {
        self.rx.await.unwrap_or(ThunkOutcome::Evicted)
    }
}
