//! # Event bus for broadcasting bridge events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] that provides
//! non-blocking event publishing from every component (locks, scheduler,
//! thunks, router, resources).
//!
//! ## Architecture
//! ```text
//! Publishers (many):                  Consumer (one):
//!   LockManager    ──┐
//!   TaskScheduler  ──┼──────► Bus ───────► listener loop ────► ListenerSet
//!   ThunkManager   ──┤  (broadcast chan)    (in Bridge)
//!   ActionRouter   ──┘
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks.
//! - **Bounded capacity**: one ring buffer shared by all receivers.
//! - **Lag handling**: slow receivers get `RecvError::Lagged(n)` and skip `n` oldest items.
//! - **No persistence**: events are lost if nobody is subscribed at send time.
//! - Nothing in a correctness path depends on bus delivery.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for bridge events.
///
/// ### Properties
/// - **Non-blocking**: `publish()` returns immediately.
/// - **Fire-and-forget**: no delivery or durability guarantees.
/// - **Cloneable**: cheap to clone (internally holds an `Arc`-backed sender).
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (min 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Event>(capacity);
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    ///
    /// If there are no receivers, the event is dropped.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that will observe subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    #[tokio::test]
    async fn receivers_see_events_published_after_subscribe() {
        let bus = Bus::new(0);
        bus.publish(Event::new(EventKind::TaskQueued));

        let mut rx = bus.subscribe();
        bus.publish(Event::new(EventKind::LockReleased).with_thunk("t1"));

        let ev = rx.recv().await.expect("event");
        assert_eq!(ev.kind, EventKind::LockReleased);
        assert_eq!(ev.thunk.as_deref(), Some("t1"));
    }
}
