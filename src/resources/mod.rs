//! # Observer resource bookkeeping.
//!
//! Bounds the number of observers the bridge keeps per-observer state for,
//! reconciles that set against the transport's view of live observers, and
//! owns the telemetry listener registry.
//!
//! ```text
//! track_observer(id) ── over max_observers? ──► evict oldest (warn + ObserverEvicted)
//!
//! reconcile(transport)
//!   active = transport.active_observer_ids()
//!   ├─ active empty, tracked non-empty ─► check transport.is_alive(id) per observer
//!   └─ otherwise                        ─► dead = tracked − active
//!   dead ─► untracked + ObserverRemoved
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::actions::ObserverId;
use crate::adapters::ObserverTransport;
use crate::events::{Bus, Event, EventKind};
use crate::listeners::{Listener, ListenerId, ListenerSet};

/// Bounded observer registry plus listener registration surface.
pub struct ResourceManager {
    observers: Mutex<VecDeque<ObserverId>>,
    limit: Option<usize>,
    listeners: ListenerSet,
    bus: Bus,
}

impl ResourceManager {
    /// `limit = None` means unbounded.
    pub fn new(limit: Option<usize>, bus: Bus) -> Self {
        Self {
            observers: Mutex::new(VecDeque::new()),
            limit,
            listeners: ListenerSet::new(bus.clone()),
            bus,
        }
    }

    /// Starts tracking `observer`. Returns the observer evicted to stay within the bound.
    pub fn track_observer(&self, observer: ObserverId) -> Option<ObserverId> {
        let evicted = {
            let mut observers = self.observers.lock();
            if observers.contains(&observer) {
                return None;
            }
            observers.push_back(observer);
            match self.limit {
                Some(max) if observers.len() > max => observers.pop_front(),
                _ => None,
            }
        };
        if let Some(old) = evicted {
            tracing::warn!(evicted = old, tracked = observer, "observer limit reached, evicting oldest");
            self.bus
                .publish(Event::new(EventKind::ObserverEvicted).with_observer(old));
        }
        evicted
    }

    /// Stops tracking `observer`.
    pub fn untrack_observer(&self, observer: ObserverId) -> bool {
        let mut observers = self.observers.lock();
        match observers.iter().position(|&o| o == observer) {
            Some(pos) => {
                observers.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Tracked observers, oldest first.
    pub fn tracked(&self) -> Vec<ObserverId> {
        self.observers.lock().iter().copied().collect()
    }

    /// Removes observers the transport no longer knows. Returns them.
    pub fn reconcile(&self, transport: &dyn ObserverTransport) -> Vec<ObserverId> {
        let tracked = self.tracked();
        if tracked.is_empty() {
            return Vec::new();
        }

        let active = transport.active_observer_ids();
        let dead: Vec<ObserverId> = if active.is_empty() {
            tracing::warn!(tracked = tracked.len(), "transport reports no live observers, checking individually");
            tracked
                .into_iter()
                .filter(|&o| !transport.is_alive(o))
                .collect()
        } else {
            tracked
                .into_iter()
                .filter(|o| !active.contains(o))
                .collect()
        };

        if !dead.is_empty() {
            self.observers.lock().retain(|o| !dead.contains(o));
            for &o in &dead {
                tracing::debug!(observer = o, "dead observer removed");
                self.bus
                    .publish(Event::new(EventKind::ObserverRemoved).with_observer(o));
            }
        }
        dead
    }

    /// Registers a telemetry listener. Must be called from within a tokio runtime.
    pub fn register_listener(&self, listener: Arc<dyn Listener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn deregister_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Listener fan-out fed by the bridge's event loop.
    pub fn listeners(&self) -> &ListenerSet {
        &self.listeners
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    struct FakeTransport {
        active: Vec<ObserverId>,
        alive: Vec<ObserverId>,
    }

    impl ObserverTransport for FakeTransport {
        fn send(&self, _observer: ObserverId, _channel: &str, _payload: &Value) -> bool {
            true
        }

        fn active_observer_ids(&self) -> Vec<ObserverId> {
            self.active.clone()
        }

        fn is_alive(&self, observer: ObserverId) -> bool {
            self.alive.contains(&observer)
        }
    }

    #[tokio::test]
    async fn oldest_observer_is_evicted() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let res = ResourceManager::new(Some(2), bus);

        assert_eq!(res.track_observer(1), None);
        assert_eq!(res.track_observer(2), None);
        assert_eq!(res.track_observer(2), None);
        assert_eq!(res.track_observer(3), Some(1));
        assert_eq!(res.tracked(), vec![2, 3]);

        let ev = rx.recv().await.expect("event");
        assert_eq!(ev.kind, EventKind::ObserverEvicted);
        assert_eq!(ev.observer, Some(1));
    }

    #[test]
    fn reconcile_against_active_list() {
        let res = ResourceManager::new(None, Bus::new(16));
        for o in [1, 2, 3] {
            res.track_observer(o);
        }
        let transport = FakeTransport {
            active: vec![1, 3],
            alive: vec![],
        };
        assert_eq!(res.reconcile(&transport), vec![2]);
        assert_eq!(res.tracked(), vec![1, 3]);
    }

    #[test]
    fn empty_active_list_falls_back_to_liveness_checks() {
        let res = ResourceManager::new(None, Bus::new(16));
        for o in [1, 2] {
            res.track_observer(o);
        }
        let transport = FakeTransport {
            active: vec![],
            alive: vec![2],
        };
        assert_eq!(res.reconcile(&transport), vec![1]);
        assert_eq!(res.tracked(), vec![2]);
    }

    #[test]
    fn untrack_is_idempotent() {
        let res = ResourceManager::new(None, Bus::new(16));
        res.track_observer(7);
        assert!(res.untrack_observer(7));
        assert!(!res.untrack_observer(7));
    }
}
