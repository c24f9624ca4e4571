//! # ListenerSet: non-blocking fan-out with explicit registration
//!
//! [`ListenerSet`] distributes each [`Event`] to every registered listener
//! **without awaiting** their processing. Listeners are added and removed
//! through [`ListenerSet::add`] / [`ListenerSet::remove`] pairs so their
//! lifetime is always owned by whoever registered them.
//!
//! ## What it guarantees
//! - `emit(&Event)` returns immediately.
//! - Per-listener FIFO (queue order).
//! - Panics inside listeners are caught and reported (isolation).
//!
//! ## What it does **not** guarantee
//! - No global ordering across different listeners.
//! - No retries on per-listener queue overflow.
//!
//! ## Diagram
//! ```text
//!    emit(&Event)
//!        │                        (Arc-clone per listener)
//!        ├────────────────► [queue L1] ─► worker L1 ─► on_event()
//!        ├────────────────► [queue L2] ─► worker L2 ─► on_event()
//!        └────────────────► [queue LN] ─► worker LN ─► on_event()
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::{sync::mpsc, task::JoinHandle};

use super::Listener;
use crate::events::{Bus, Event};

/// Handle returned by [`ListenerSet::add`], used to deregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Per-listener channel with metadata.
struct ListenerChannel {
    id: ListenerId,
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
    worker: JoinHandle<()>,
}

/// Composite fan-out with per-listener bounded queues and worker tasks.
pub struct ListenerSet {
    channels: Mutex<Vec<ListenerChannel>>,
    next_id: AtomicU64,
    bus: Bus,
}

impl ListenerSet {
    /// Creates an empty set. Overflow and panic reports go to `bus`.
    #[must_use]
    pub fn new(bus: Bus) -> Self {
        Self {
            channels: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            bus,
        }
    }

    /// Registers a listener and spawns its worker.
    ///
    /// The queue is bounded to `max(queue_capacity, 1)`. Must be called from
    /// within a tokio runtime.
    pub fn add(&self, listener: Arc<dyn Listener>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cap = listener.queue_capacity().max(1);
        let name = listener.name();
        let (tx, mut rx) = mpsc::channel::<Arc<Event>>(cap);
        let bus = self.bus.clone();

        let worker = tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                let fut = listener.on_event(ev.as_ref());
                if let Err(panic_err) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                    bus.publish(Event::listener_panicked(name, panic_message(&*panic_err)));
                }
            }
        });

        self.channels.lock().push(ListenerChannel {
            id,
            name,
            sender: tx,
            worker,
        });
        tracing::debug!(listener = name, "listener registered");
        id
    }

    /// Deregisters a listener. Its worker drains queued events and exits.
    ///
    /// Returns `false` if the id is unknown (already removed).
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut channels = self.channels.lock();
        match channels.iter().position(|c| c.id == id) {
            Some(pos) => {
                let channel = channels.swap_remove(pos);
                tracing::debug!(listener = channel.name, "listener deregistered");
                true
            }
            None => false,
        }
    }

    /// Fan-out one event to all listeners (non-blocking).
    ///
    /// If a listener's queue is **full** or **closed**, the event is dropped for
    /// it and a `ListenerOverflow` event is published.
    pub fn emit(&self, event: &Event) {
        // No overflow-on-overflow.
        let is_overflow_evt = event.is_listener_overflow();

        let ev = Arc::new(event.clone());
        let channels = self.channels.lock();
        for channel in channels.iter() {
            let reason = match channel.sender.try_send(Arc::clone(&ev)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            if !is_overflow_evt {
                self.bus.publish(Event::listener_overflow(channel.name, reason));
            }
        }
    }

    /// Graceful shutdown: close all queues and await worker completion.
    pub async fn shutdown(&self) {
        let channels: Vec<ListenerChannel> = std::mem::take(&mut *self.channels.lock());
        for channel in channels {
            drop(channel.sender);
            let _ = channel.worker.await;
        }
    }

    /// True if there are no listeners.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.lock().is_empty()
    }

    /// Number of listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.lock().len()
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
