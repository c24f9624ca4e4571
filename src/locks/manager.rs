//! # Key-based lock manager.
//!
//! Answers "can this set of state keys be acquired now?" and keeps the registry
//! of active entries keyed by thunk id. The check is cheap, synchronous and
//! side-effect free; all ordering decisions live in the
//! [`TaskScheduler`](crate::TaskScheduler).
//!
//! ## Acquisition
//! ```text
//! acquire(id, keys, bypass)
//!   ├─ bypass                       → register, Ok
//!   ├─ other non-bypass global      → LockConflict
//!   ├─ request global + any other   → LockConflict
//!   ├─ key paths overlap            → LockConflict
//!   └─ otherwise                    → register, Ok
//! ```
//!
//! ## Rules
//! - Bypass entries never block and are never blocked.
//! - An id never conflicts with its own entry (re-acquire is idempotent).
//! - `release` publishes `LockReleased` and wakes [`released`](LockManager::released)
//!   waiters so blocked work can retry.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::sync::futures::Notified;

use super::keys::scopes_overlap;
use crate::actions::Action;
use crate::error::LockConflict;
use crate::events::{Bus, Event, EventKind};

/// Registry entry for one thunk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockEntry {
    /// Locked key scope (`None` = global).
    pub keys: Option<Vec<String>>,
    /// Bypass entries are exempt from conflict checks.
    pub bypass: bool,
}

/// Registry of active lock entries.
pub struct LockManager {
    entries: Mutex<HashMap<String, LockEntry>>,
    released: Notify,
    bus: Bus,
}

impl LockManager {
    /// Creates an empty manager publishing lock events to `bus`.
    pub fn new(bus: Bus) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            released: Notify::new(),
            bus,
        }
    }

    /// Registers an entry for `thunk_id` unless it conflicts with another active entry.
    pub fn acquire(
        &self,
        thunk_id: &str,
        keys: Option<&[String]>,
        bypass: bool,
    ) -> Result<(), LockConflict> {
        let mut entries = self.entries.lock();
        if !bypass {
            if let Some(conflict) = find_conflict(&entries, thunk_id, keys) {
                tracing::debug!(thunk = thunk_id, holder = %conflict.holder, "lock refused");
                return Err(conflict);
            }
        }

        let entry = LockEntry {
            keys: keys.map(<[String]>::to_vec),
            bypass,
        };
        if entries.insert(thunk_id.to_string(), entry).is_none() {
            drop(entries);
            self.bus
                .publish(Event::new(EventKind::LockAcquired).with_thunk(thunk_id));
        }
        Ok(())
    }

    /// Same check as [`acquire`](Self::acquire) without registering anything.
    pub fn can_acquire(&self, thunk_id: &str, keys: Option<&[String]>, bypass: bool) -> bool {
        bypass || find_conflict(&self.entries.lock(), thunk_id, keys).is_none()
    }

    /// Removes the entry for `thunk_id`. Returns `false` if none was held.
    pub fn release(&self, thunk_id: &str) -> bool {
        let removed = self.entries.lock().remove(thunk_id).is_some();
        if removed {
            tracing::debug!(thunk = thunk_id, "lock released");
            self.released.notify_waiters();
            self.bus
                .publish(Event::new(EventKind::LockReleased).with_thunk(thunk_id));
        }
        removed
    }

    /// Resolves after the next successful [`release`](Self::release).
    ///
    /// Call `enable` on the pinned future before checking the registry,
    /// otherwise a release between the check and the await is missed.
    pub fn released(&self) -> Notified<'_> {
        self.released.notified()
    }

    /// True if `thunk_id` currently holds an entry.
    pub fn holds(&self, thunk_id: &str) -> bool {
        self.entries.lock().contains_key(thunk_id)
    }

    /// True if any active non-bypass entry overlaps `keys` (`None` = global).
    pub fn is_locked(&self, keys: Option<&[String]>) -> bool {
        self.entries
            .lock()
            .values()
            .any(|e| !e.bypass && scopes_overlap(e.keys.as_deref(), keys))
    }

    /// Decides whether a free-standing action may be applied right now.
    ///
    /// - bypass-tagged actions are always admitted;
    /// - with no active entries everything is admitted;
    /// - actions of a thunk that holds an entry are admitted (a thunk never
    ///   conflicts with itself);
    /// - otherwise the action's keys must not overlap any active non-bypass entry.
    pub fn can_process_action(&self, action: &Action) -> bool {
        if action.bypass_lock {
            return true;
        }
        let entries = self.entries.lock();
        if entries.is_empty() {
            return true;
        }
        if let Some(parent) = action.thunk_parent_id.as_deref() {
            if entries.contains_key(parent) {
                return true;
            }
        }
        !entries
            .values()
            .any(|e| !e.bypass && scopes_overlap(e.keys.as_deref(), action.keys.as_deref()))
    }

    /// Sorted snapshot of active entries.
    pub fn active_locks(&self) -> Vec<(String, LockEntry)> {
        let mut locks: Vec<(String, LockEntry)> = self
            .entries
            .lock()
            .iter()
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect();
        locks.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        locks
    }

    /// Number of active entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// True if no entry is active.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

fn find_conflict(
    entries: &HashMap<String, LockEntry>,
    thunk_id: &str,
    keys: Option<&[String]>,
) -> Option<LockConflict> {
    entries
        .iter()
        .filter(|(id, e)| id.as_str() != thunk_id && !e.bypass)
        .find(|(_, e)| scopes_overlap(e.keys.as_deref(), keys))
        .map(|(id, e)| LockConflict {
            requested: thunk_id.to_string(),
            holder: id.clone(),
            holder_keys: e.keys.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(k: &[&str]) -> Vec<String> {
        k.iter().map(|s| s.to_string()).collect()
    }

    fn manager() -> LockManager {
        LockManager::new(Bus::new(64))
    }

    #[test]
    fn disjoint_keys_coexist() {
        let locks = manager();
        assert!(locks.acquire("a", Some(&keys(&["counter"])), false).is_ok());
        assert!(locks.acquire("b", Some(&keys(&["theme"])), false).is_ok());
        assert_eq!(locks.len(), 2);
    }

    #[test]
    fn overlapping_keys_conflict_until_release() {
        let locks = manager();
        locks.acquire("a", Some(&keys(&["user"])), false).expect("first");
        let err = locks
            .acquire("b", Some(&keys(&["user.name"])), false)
            .expect_err("overlap");
        assert_eq!(err.holder, "a");

        assert!(locks.release("a"));
        assert!(!locks.release("a"));
        assert!(locks.acquire("b", Some(&keys(&["user.name"])), false).is_ok());
    }

    #[test]
    fn global_lock_excludes_and_is_excluded() {
        let locks = manager();
        locks.acquire("g", None, false).expect("global");
        assert!(locks.acquire("a", Some(&keys(&["theme"])), false).is_err());
        locks.release("g");

        locks.acquire("a", Some(&keys(&["theme"])), false).expect("keyed");
        assert!(locks.acquire("g", None, false).is_err());
    }

    #[test]
    fn bypass_never_blocks_nor_is_blocked() {
        let locks = manager();
        locks.acquire("g", None, false).expect("global");
        assert!(locks.acquire("admin", None, true).is_ok());
        assert!(locks.acquire("admin2", Some(&keys(&["counter"])), true).is_ok());

        locks.release("g");
        // Only bypass entries remain, so a global request succeeds.
        assert!(locks.acquire("g2", None, false).is_ok());
    }

    #[test]
    fn reacquire_is_idempotent() {
        let locks = manager();
        locks.acquire("a", Some(&keys(&["counter"])), false).expect("first");
        assert!(locks.acquire("a", Some(&keys(&["counter"])), false).is_ok());
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn is_locked_reports_overlap() {
        let locks = manager();
        assert!(!locks.is_locked(None));
        locks.acquire("a", Some(&keys(&["counter"])), false).expect("lock");
        assert!(locks.is_locked(Some(&keys(&["counter"]))));
        assert!(!locks.is_locked(Some(&keys(&["theme"]))));
        assert!(locks.is_locked(None));
    }

    #[test]
    fn can_process_action_rules() {
        let locks = manager();
        let free = Action::new("THEME:TOGGLE").with_keys(["theme"]);
        assert!(locks.can_process_action(&Action::new("ANY")));

        locks.acquire("g", None, false).expect("global");
        assert!(!locks.can_process_action(&free));
        assert!(locks.can_process_action(&free.clone().bypassing_lock()));
        assert!(locks.can_process_action(&Action::new("COUNTER:SET").with_thunk("g")));
        assert!(!locks.can_process_action(&Action::new("COUNTER:SET").with_thunk("other")));

        locks.release("g");
        locks.acquire("a", Some(&keys(&["counter"])), false).expect("keyed");
        assert!(locks.can_process_action(&free));
    }

    #[tokio::test]
    async fn release_publishes_event() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let locks = LockManager::new(bus);

        locks.acquire("a", None, false).expect("lock");
        locks.release("a");

        assert_eq!(rx.recv().await.expect("acquired").kind, EventKind::LockAcquired);
        let released = rx.recv().await.expect("released");
        assert_eq!(released.kind, EventKind::LockReleased);
        assert_eq!(released.thunk.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn release_wakes_enabled_waiters() {
        let locks = LockManager::new(Bus::new(16));
        locks.acquire("a", None, false).expect("lock");

        let released = locks.released();
        tokio::pin!(released);
        released.as_mut().enable();
        assert!(locks.acquire("b", None, false).is_err());

        locks.release("a");
        tokio::time::timeout(std::time::Duration::from_secs(1), released)
            .await
            .expect("woken by release");
        assert!(locks.acquire("b", None, false).is_ok());
    }
}
