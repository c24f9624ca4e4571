//! # bridgevisor
//!
//! **Bridgevisor** is the concurrency-control core of a cross-process state
//! synchronization bridge.
//!
//! One *owner* process holds the authoritative state; many *observer*
//! processes (windows, views) submit actions and receive minimal partial
//! updates. The crate decides when each action may run, keeps multi-step
//! operations (*thunks*) from interleaving on overlapping state keys, and
//! declares a thunk finished only after every observer acknowledged the
//! changes it caused.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   observer process                         owner process
//! ┌──────────────────┐            ┌─────────────────────────────────────────────┐
//! │  ActionBatcher   │  batch     │  Bridge                                     │
//! │  (window/size/   ├───────────►│   process_batch ──► ActionRouter            │
//! │   priority)      │◄───────────┤                      ├─ middleware veto     │
//! └──────────────────┘  results   │                      ├─ thunk action ───┐   │
//!                                 │                      ├─ free & unlocked │   │
//!                                 │                      │    ▼             ▼   │
//!                                 │                      │  ActionExecutor  TaskScheduler
//!                                 │                      │    │             │   │
//!                                 │                      │    ▼             ▼   │
//!                                 │                      │  StateAdapter   LockManager
//!                                 │                      │    │ change          │
//!                                 │                      ▼    ▼                 │
//!                                 │   SubscriptionManager::collect(prev, next)  │
//!                                 │            │                                │
//!   observers ◄── "state-update" ─┼────────────┘                                │
//!       │                         │   ThunkManager (lifecycle, acknowledgements)│
//!       └──── acknowledge ───────►│   ResourceManager (observer bound, liveness)│
//!                                 └─────────────────────────────────────────────┘
//!                                                  │ Bus (broadcast events)
//!                                                  ▼
//!                                  ListenerSet ──► telemetry listeners
//! ```
//!
//! ### Thunk lifecycle
//! ```text
//! register ─► Pending ─► execute ─► Executing ─┬─► complete ─► (actions settled,
//!              ▲            │                  │               children finished,
//!              └─ keys held ┘                  │               updates acknowledged)
//!                 elsewhere                    │               ─► Completed ─► lock released
//!                                              └─► fail ─► queued tasks dropped ─► Failed
//! ```
//!
//! A root thunk takes its lock entry when it starts executing and keeps it
//! until it finished, so two thunks with overlapping keys never execute at
//! the same time. Nested thunks share their root's entry.
//!
//! ## Features
//! | Area               | Description                                                        | Key types / traits                         |
//! |--------------------|--------------------------------------------------------------------|--------------------------------------------|
//! | **Bridge**         | Wires components and exposes the host API.                         | [`Bridge`], [`BridgeBuilder`]              |
//! | **Locks**          | Key-scoped exclusive locks with dotted-path overlap.               | [`LockManager`]                            |
//! | **Scheduling**     | Priority queue running non-conflicting tasks concurrently.         | [`TaskScheduler`], [`Task`]                |
//! | **Thunks**         | Lifecycle, nesting, root tracking, acknowledgement gating.         | [`ThunkManager`], [`ThunkSpec`]            |
//! | **Routing**        | Middleware, immediate execution or scheduling.                     | [`ActionRouter`], [`Middleware`]           |
//! | **Batching**       | Observer-side coalescing of action submissions.                    | [`ActionBatcher`]                          |
//! | **Subscriptions**  | Per-observer key interest and partial state diffs.                 | [`SubscriptionManager`], [`Interest`]      |
//! | **Telemetry**      | Event bus and listener fan-out.                                    | [`Event`], [`Listener`]                    |
//! | **Transactions**   | Per-action timelines from dispatch to acknowledgement.             | [`TransactionTracker`]                     |
//! | **Errors**         | Typed errors for API misuse, actions, batches and tasks.           | [`BridgeError`], [`ActionError`]           |
//! | **Configuration**  | Centralized runtime settings.                                      | [`BridgeConfig`], [`BatcherConfig`]        |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use parking_lot::Mutex;
//! use serde_json::{Value, json};
//! use bridgevisor::{
//!     Action, Applied, BridgeBuilder, ObserverId, ObserverTransport, State, StateAdapter,
//!     StateListener, ThunkOutcome, ThunkSpec, Unsubscribe,
//! };
//!
//! #[derive(Default)]
//! struct Store {
//!     state: Mutex<Value>,
//!     listeners: Mutex<Vec<StateListener>>,
//! }
//!
//! impl StateAdapter for Store {
//!     fn kind(&self) -> &'static str { "memory" }
//!     fn get_state(&self) -> State { self.state.lock().clone() }
//!     fn subscribe(&self, l: StateListener) -> Unsubscribe {
//!         self.listeners.lock().push(l);
//!         Unsubscribe::noop()
//!     }
//!     fn process_action(&self, a: &Action) -> anyhow::Result<Applied> {
//!         let next = {
//!             let mut s = self.state.lock();
//!             s["counter"] = a.payload.clone().unwrap_or(Value::Null);
//!             s.clone()
//!         };
//!         let listeners = self.listeners.lock().clone();
//!         listeners.iter().for_each(|l| l(&next));
//!         Ok(Applied::Sync)
//!     }
//! }
//!
//! struct Loopback;
//!
//! impl ObserverTransport for Loopback {
//!     fn send(&self, _: ObserverId, _: &str, _: &Value) -> bool { false }
//!     fn active_observer_ids(&self) -> Vec<ObserverId> { vec![1] }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bridge = BridgeBuilder::new(Arc::new(Store::default()), Arc::new(Loopback)).build();
//!
//!     let spec = ThunkSpec::new("t1", 1).with_keys(["counter"]);
//!     let outcome = bridge
//!         .run_thunk(spec, |ctx| async move {
//!             ctx.dispatch(Action::new("COUNTER:SET").with_payload(json!(4)))?
//!                 .settle()
//!                 .await?;
//!             Ok(None)
//!         })
//!         .await?;
//!
//!     assert_eq!(outcome, ThunkOutcome::Completed(None));
//!     assert_eq!(bridge.get_state()["counter"], json!(4));
//!     bridge.shutdown().await;
//!     Ok(())
//! }
//! ```
mod actions;
mod adapters;
mod batcher;
mod config;
mod core;
mod error;
mod events;
mod listeners;
mod locks;
mod resources;
mod router;
mod scheduler;
mod subscriptions;
mod thunks;

// ---- Public re-exports ----

pub use actions::{Action, ActionCompletion, ActionResult, ObserverId, State};
pub use adapters::{Applied, BatchTransport, ObserverTransport, StateAdapter, StateListener, Unsubscribe};
pub use batcher::{
    ActionBatcher, BatchItem, BatchPending, BatchRequest, BatchResponse, BatchResult, BatcherStats,
};
pub use config::{BatcherConfig, BridgeConfig};
pub use core::{Bridge, BridgeBuilder, MaintenanceReport, STATE_UPDATE_CHANNEL, ThunkContext};
pub use error::{ActionError, BatchError, BridgeError, LockConflict, Phase, TaskError};
pub use events::{Bus, Event, EventKind};
pub use listeners::{
    Listener, ListenerId, ListenerSet, Transaction, TransactionLatency, TransactionTracker,
};
pub use locks::{LockEntry, LockManager, paths_overlap, scopes_overlap};
pub use resources::ResourceManager;
pub use router::{ActionExecutor, ActionRouter, Middleware, current_action, current_thunk};
pub use scheduler::{QueueStatus, Task, TaskFuture, TaskHandle, TaskScheduler};
pub use subscriptions::{
    Delivery, Interest, SubscriptionCallback, SubscriptionHandle, SubscriptionManager, extract,
    get_path,
};
pub use thunks::{
    ActiveThunks, LockScope, Thunk, ThunkHandle, ThunkKind, ThunkManager, ThunkOutcome, ThunkSpec,
    ThunkState, ThunkSummary,
};

// Optional: expose a simple built-in logger listener (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use listeners::LogWriter;
