//! # Lifecycle events emitted by the bridge components.
//!
//! The [`EventKind`] enum classifies event types across these categories:
//! - **Thunk events**: registration, execution, completion, failure, eviction, root changes
//! - **Task events**: scheduler queueing and settlement
//! - **Lock events**: acquisition and release
//! - **Action events**: dispatch, receipt, application, failure
//! - **State-update events**: delivery, acknowledgement, expiry
//! - **Observer / listener events**: eviction, removal, listener faults
//!
//! The [`Event`] struct carries metadata such as timestamps, ids and reasons.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use bridgevisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::ThunkFailed)
//!     .with_thunk("thunk-1")
//!     .with_observer(3)
//!     .with_reason("boom");
//!
//! assert_eq!(ev.kind, EventKind::ThunkFailed);
//! assert_eq!(ev.thunk.as_deref(), Some("thunk-1"));
//! assert_eq!(ev.observer, Some(3));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::actions::ObserverId;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of bridge events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Listener events ===
    /// Listener panicked during event processing.
    ///
    /// Sets:
    /// - `reason`: listener name and panic info
    ListenerPanicked,

    /// Listener dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `reason`: listener name and reason (`full` / `closed`)
    ListenerOverflow,

    // === Thunk lifecycle ===
    /// Thunk record allocated (state `Pending`).
    ///
    /// Sets: `thunk`, `observer`
    ThunkRegistered,

    /// Thunk activated (state `Executing`).
    ///
    /// Sets: `thunk`
    ThunkStarted,

    /// Thunk finalized successfully.
    ///
    /// Sets: `thunk`, `duration_ms`
    ThunkCompleted,

    /// Thunk finalized with an error.
    ///
    /// Sets: `thunk`, `reason`
    ThunkFailed,

    /// Thunk record evicted from the registry.
    ///
    /// Sets: `thunk`
    ThunkEvicted,

    /// Root thunk changed.
    ///
    /// Sets: `thunk` (new root, absent when cleared)
    RootChanged,

    // === Scheduler ===
    /// Task entered the queue.
    ///
    /// Sets: `task`, `thunk`
    TaskQueued,

    /// Task moved from the queue to the running set.
    ///
    /// Sets: `task`, `thunk`
    TaskStarted,

    /// Task handler finished successfully.
    ///
    /// Sets: `task`, `thunk`, `duration_ms`
    TaskCompleted,

    /// Task handler failed (error or caught panic).
    ///
    /// Sets: `task`, `thunk`, `reason`
    TaskFailed,

    /// Queued tasks were purged for a thunk.
    ///
    /// Sets: `thunk`, `count`
    TasksRemoved,

    // === Locks ===
    /// Lock entry registered.
    ///
    /// Sets: `thunk`
    LockAcquired,

    /// Lock entry released; blocked requests may retry.
    ///
    /// Sets: `thunk`
    LockReleased,

    // === Actions ===
    /// Action sent across the transport inside a batch (submission side).
    ///
    /// Sets: `action`, `action_type`, `reason` (batch id), `count` (batch size), `observer`
    ActionDispatched,

    /// Action entered the router.
    ///
    /// Sets: `action`, `action_type`, `thunk`, `observer`
    ActionReceived,

    /// Action applied to the state container.
    ///
    /// Sets: `action`, `action_type`, `thunk`
    ActionApplied,

    /// Action failed.
    ///
    /// Sets: `action`, `action_type`, `thunk`, `reason`
    ActionFailed,

    // === State updates ===
    /// Partial state delivered to an observer.
    ///
    /// Sets: `update`, `observer`, `thunk`, `action` and `action_type` (the
    /// action whose application caused the change, if any)
    StateUpdateSent,

    /// Observer acknowledged a state update.
    ///
    /// Sets: `update`, `observer`
    StateUpdateAcknowledged,

    /// Update dropped by the expiry sweep.
    ///
    /// Sets: `update`, `thunk`
    StateUpdateExpired,

    // === Observers ===
    /// Observer registry evicted because the bound was exceeded.
    ///
    /// Sets: `observer`
    ObserverEvicted,

    /// Observer found dead during reconciliation and cleaned up.
    ///
    /// Sets: `observer`
    ObserverRemoved,
}

/// Bridge event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Thunk id, if applicable.
    pub thunk: Option<Arc<str>>,
    /// Task id, if applicable.
    pub task: Option<Arc<str>>,
    /// Action id, if applicable.
    pub action: Option<Arc<str>>,
    /// Action type, if applicable.
    pub action_type: Option<Arc<str>>,
    /// State update id, if applicable.
    pub update: Option<Arc<str>>,
    /// Observer id, if applicable.
    pub observer: Option<ObserverId>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Item count (batch size, purged tasks).
    pub count: Option<u32>,
    /// Elapsed time in milliseconds (compact).
    pub duration_ms: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            thunk: None,
            task: None,
            action: None,
            action_type: None,
            update: None,
            observer: None,
            reason: None,
            count: None,
            duration_ms: None,
        }
    }

    /// Attaches a thunk id.
    #[inline]
    pub fn with_thunk(mut self, thunk: impl Into<Arc<str>>) -> Self {
        self.thunk = Some(thunk.into());
        self
    }

    /// Attaches a task id.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches an action id and type.
    #[inline]
    pub fn with_action(mut self, id: impl Into<Arc<str>>, action_type: impl Into<Arc<str>>) -> Self {
        self.action = Some(id.into());
        self.action_type = Some(action_type.into());
        self
    }

    /// Attaches a state update id.
    #[inline]
    pub fn with_update(mut self, update: impl Into<Arc<str>>) -> Self {
        self.update = Some(update.into());
        self
    }

    /// Attaches an observer id.
    #[inline]
    pub fn with_observer(mut self, observer: ObserverId) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches an item count (saturating at `u32::MAX`).
    #[inline]
    pub fn with_count(mut self, n: usize) -> Self {
        self.count = Some(n.min(u32::MAX as usize) as u32);
        self
    }

    /// Attaches an elapsed duration (stored as milliseconds).
    #[inline]
    pub fn with_duration(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.duration_ms = Some(ms);
        self
    }

    /// Attaches the thunk id when present.
    #[inline]
    pub fn with_thunk_opt(self, thunk: Option<&str>) -> Self {
        match thunk {
            Some(t) => self.with_thunk(t),
            None => self,
        }
    }

    /// Creates a listener overflow event.
    #[inline]
    pub fn listener_overflow(listener: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::ListenerOverflow)
            .with_reason(format!("listener={listener} reason={reason}"))
    }

    /// Creates a listener panic event.
    #[inline]
    pub fn listener_panicked(listener: &'static str, info: String) -> Self {
        Event::new(EventKind::ListenerPanicked).with_reason(format!("listener={listener} info={info}"))
    }

    #[inline]
    pub fn is_listener_overflow(&self) -> bool {
        matches!(self.kind, EventKind::ListenerOverflow)
    }
}
