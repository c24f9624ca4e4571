//! # State update acknowledgement tracking.
//!
//! Every state change caused by a thunk's action is delivered to a set of
//! observers under a fresh update id. The thunk stays unfinished until each
//! of those observers acknowledged the update, died, or the update expired.
//!
//! ```text
//! track(u1, thunk, [1, 2])
//! acknowledge(u1, 1)        → Pending
//! acknowledge(u1, 2)        → Settled(thunk)
//! acknowledge(u1, 2)        → Stale (already gone, treated as success)
//! ```

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::actions::ObserverId;
use crate::events::{Bus, Event, EventKind};

/// Result of a single acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AckOutcome {
    /// Unknown update id (duplicate or late acknowledgement).
    Stale,
    /// The observer was not a recipient of this update.
    NotRecipient,
    /// Other recipients still owe an acknowledgement.
    Pending,
    /// Last acknowledgement; the update is gone.
    Settled { thunk_id: String },
}

struct TrackedUpdate {
    thunk_id: String,
    waiting: BTreeSet<ObserverId>,
    created_at: Instant,
}

/// Registry of unacknowledged state updates.
pub(crate) struct StateUpdateTracker {
    updates: Mutex<HashMap<String, TrackedUpdate>>,
    bus: Bus,
}

impl StateUpdateTracker {
    pub(crate) fn new(bus: Bus) -> Self {
        Self {
            updates: Mutex::new(HashMap::new()),
            bus,
        }
    }

    /// Starts tracking `update_id`. Nothing is tracked without recipients.
    pub(crate) fn track(
        &self,
        update_id: &str,
        thunk_id: &str,
        observers: impl IntoIterator<Item = ObserverId>,
    ) -> bool {
        let waiting: BTreeSet<ObserverId> = observers.into_iter().collect();
        if waiting.is_empty() {
            return false;
        }
        tracing::debug!(update = update_id, thunk = thunk_id, recipients = waiting.len(), "state update tracked");
        self.updates.lock().insert(
            update_id.to_string(),
            TrackedUpdate {
                thunk_id: thunk_id.to_string(),
                waiting,
                created_at: Instant::now(),
            },
        );
        true
    }

    pub(crate) fn acknowledge(&self, update_id: &str, observer: ObserverId) -> AckOutcome {
        let mut updates = self.updates.lock();
        let Some(update) = updates.get_mut(update_id) else {
            return AckOutcome::Stale;
        };
        if !update.waiting.remove(&observer) {
            return AckOutcome::NotRecipient;
        }
        if update.waiting.is_empty() {
            let thunk_id = updates
                .remove(update_id)
                .map(|u| u.thunk_id)
                .unwrap_or_default();
            AckOutcome::Settled { thunk_id }
        } else {
            AckOutcome::Pending
        }
    }

    /// True if any update is outstanding, for `thunk_id` or at all.
    pub(crate) fn has_pending(&self, thunk_id: Option<&str>) -> bool {
        let updates = self.updates.lock();
        match thunk_id {
            Some(id) => updates.values().any(|u| u.thunk_id == id),
            None => !updates.is_empty(),
        }
    }

    /// Number of outstanding updates of `thunk_id`.
    pub(crate) fn pending_for(&self, thunk_id: &str) -> usize {
        self.updates
            .lock()
            .values()
            .filter(|u| u.thunk_id == thunk_id)
            .count()
    }

    /// Drops `observer` from a single update without an acknowledgement, for
    /// a recipient the update never reached.
    ///
    /// Returns the owning thunk when that was the last recipient.
    pub(crate) fn drop_recipient(&self, update_id: &str, observer: ObserverId) -> Option<String> {
        let mut updates = self.updates.lock();
        let update = updates.get_mut(update_id)?;
        if !update.waiting.remove(&observer) || !update.waiting.is_empty() {
            return None;
        }
        updates.remove(update_id).map(|u| u.thunk_id)
    }

    /// Drops `observer` from every update as if it had acknowledged.
    ///
    /// Returns whether anything referenced the observer, plus the thunks whose
    /// updates settled as a result.
    pub(crate) fn cleanup_dead_renderer(&self, observer: ObserverId) -> (bool, Vec<String>) {
        let mut touched = false;
        let mut settled = Vec::new();
        self.updates.lock().retain(|_, u| {
            if u.waiting.remove(&observer) {
                touched = true;
                if u.waiting.is_empty() {
                    settled.push(u.thunk_id.clone());
                    return false;
                }
            }
            true
        });
        (touched, settled)
    }

    /// Drops updates older than `max_age`. Returns the owning thunk of each
    /// dropped update.
    pub(crate) fn cleanup_expired(&self, max_age: Duration) -> Vec<String> {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.updates.lock().retain(|id, u| {
            if now.duration_since(u.created_at) < max_age {
                return true;
            }
            expired.push((id.clone(), u.thunk_id.clone()));
            false
        });

        for (update, thunk) in &expired {
            tracing::debug!(update = %update, thunk = %thunk, "state update expired");
            self.bus.publish(
                Event::new(EventKind::StateUpdateExpired)
                    .with_update(update.as_str())
                    .with_thunk(thunk.as_str()),
            );
        }
        expired.into_iter().map(|(_, thunk)| thunk).collect()
    }

    /// Forgets every update of `thunk_id`.
    pub(crate) fn forget_thunk(&self, thunk_id: &str) {
        self.updates.lock().retain(|_, u| u.thunk_id != thunk_id);
    }

    pub(crate) fn len(&self) -> usize {
        self.updates.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> StateUpdateTracker {
        StateUpdateTracker::new(Bus::new(64))
    }

    #[test]
    fn settles_after_every_recipient_acknowledged() {
        let t = tracker();
        assert!(t.track("u1", "A", [1, 2]));
        assert_eq!(t.acknowledge("u1", 1), AckOutcome::Pending);
        assert!(t.has_pending(Some("A")));
        assert_eq!(
            t.acknowledge("u1", 2),
            AckOutcome::Settled {
                thunk_id: "A".into()
            }
        );
        assert!(!t.has_pending(Some("A")));
        assert_eq!(t.acknowledge("u1", 2), AckOutcome::Stale);
    }

    #[test]
    fn no_recipients_tracks_nothing() {
        let t = tracker();
        assert!(!t.track("u1", "A", []));
        assert_eq!(t.len(), 0);
    }

    #[test]
    fn foreign_observer_is_not_a_recipient() {
        let t = tracker();
        t.track("u1", "A", [1]);
        assert_eq!(t.acknowledge("u1", 9), AckOutcome::NotRecipient);
        assert_eq!(t.pending_for("A"), 1);
    }

    #[test]
    fn dead_renderer_completes_update() {
        let t = tracker();
        t.track("u1", "A", [1, 2]);
        t.acknowledge("u1", 1);

        let (touched, settled) = t.cleanup_dead_renderer(2);
        assert!(touched);
        assert_eq!(settled, vec!["A".to_string()]);
        assert!(!t.has_pending(None));

        let (touched, settled) = t.cleanup_dead_renderer(2);
        assert!(!touched);
        assert!(settled.is_empty());
    }

    #[test]
    fn unreached_recipient_is_dropped_from_one_update() {
        let t = tracker();
        t.track("u1", "A", [1, 2]);
        t.track("u2", "A", [2]);

        assert_eq!(t.drop_recipient("u1", 2), None);
        assert_eq!(t.pending_for("A"), 2);
        assert_eq!(t.drop_recipient("u1", 1), Some("A".to_string()));
        assert_eq!(t.drop_recipient("u1", 1), None);
        // u2 still waits for observer 2.
        assert_eq!(t.pending_for("A"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_updates_are_dropped() {
        let t = tracker();
        t.track("u1", "A", [1, 2]);
        t.acknowledge("u1", 1);

        assert!(t.cleanup_expired(Duration::from_secs(30)).is_empty());
        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(t.cleanup_expired(Duration::from_secs(30)), vec!["A".to_string()]);
        assert!(!t.has_pending(Some("A")));
    }
}
