//! # Per-action transaction tracking.
//!
//! [`TransactionTracker`] follows single actions through the bridge using
//! nothing but bus events, and keeps one [`Transaction`] per action id.
//!
//! ```text
//! ActionDispatched         ─► dispatched_at    (submission side, batcher bus)
//! ActionReceived           ─► received_at
//! ActionApplied / Failed   ─► settled_at
//! StateUpdateSent          ─► update_sent_at   (first update caused by the action)
//! StateUpdateAcknowledged  ─► acknowledged_at  (latest acknowledgement)
//! ```
//!
//! Acknowledgements name only the update, so the tracker remembers which
//! action caused each update. An acknowledgement may overtake the matching
//! `StateUpdateSent` (observers can answer while the send is still on the
//! stack); it is parked until the update shows up.
//!
//! Records older than `max_age` are dropped, and beyond `capacity` the oldest
//! records go first.

use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use crate::events::{Event, EventKind};
use crate::listeners::Listener;

/// Timeline of one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub action_id: String,
    pub action_type: String,
    pub dispatched_at: Option<SystemTime>,
    pub received_at: Option<SystemTime>,
    /// Applied or failed.
    pub settled_at: Option<SystemTime>,
    pub failed: bool,
    pub update_sent_at: Option<SystemTime>,
    pub acknowledged_at: Option<SystemTime>,
}

/// Phase durations of a [`Transaction`]. A phase is `None` while one of its
/// ends is missing or the clock went backwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionLatency {
    pub dispatch_to_receive: Option<Duration>,
    pub receive_to_settle: Option<Duration>,
    pub settle_to_update: Option<Duration>,
    pub update_to_acknowledge: Option<Duration>,
    /// From the first recorded timestamp to the acknowledgement.
    pub total: Option<Duration>,
}

impl Transaction {
    fn new(action_id: &str, action_type: &str) -> Self {
        Self {
            action_id: action_id.to_string(),
            action_type: action_type.to_string(),
            dispatched_at: None,
            received_at: None,
            settled_at: None,
            failed: false,
            update_sent_at: None,
            acknowledged_at: None,
        }
    }

    /// Earliest timestamp of the record.
    pub fn first_seen(&self) -> Option<SystemTime> {
        self.dispatched_at
            .or(self.received_at)
            .or(self.settled_at)
            .or(self.update_sent_at)
    }

    pub fn latency(&self) -> TransactionLatency {
        TransactionLatency {
            dispatch_to_receive: between(self.dispatched_at, self.received_at),
            receive_to_settle: between(self.received_at, self.settled_at),
            settle_to_update: between(self.settled_at, self.update_sent_at),
            update_to_acknowledge: between(self.update_sent_at, self.acknowledged_at),
            total: between(self.first_seen(), self.acknowledged_at),
        }
    }
}

fn between(from: Option<SystemTime>, to: Option<SystemTime>) -> Option<Duration> {
    to?.duration_since(from?).ok()
}

#[derive(Default)]
struct Ledger {
    records: HashMap<String, Transaction>,
    /// Update id -> action id.
    updates: HashMap<String, String>,
    /// Acknowledgements that arrived before their update was seen.
    early_acks: HashMap<String, SystemTime>,
}

impl Ledger {
    fn record(&mut self, ev: &Event) -> Option<&mut Transaction> {
        let id = ev.action.as_deref()?;
        let action_type = ev.action_type.as_deref().unwrap_or_default();
        Some(
            self.records
                .entry(id.to_string())
                .or_insert_with(|| Transaction::new(id, action_type)),
        )
    }

    fn prune(&mut self, now: SystemTime, max_age: Duration, capacity: usize) {
        let fresh = |t: SystemTime| now.duration_since(t).map_or(true, |age| age < max_age);
        self.records
            .retain(|_, r| r.first_seen().is_none_or(&fresh));
        self.early_acks.retain(|_, at| fresh(*at));

        if self.records.len() > capacity {
            let mut by_age: Vec<(Option<SystemTime>, String)> = self
                .records
                .values()
                .map(|r| (r.first_seen(), r.action_id.clone()))
                .collect();
            by_age.sort();
            let excess = self.records.len() - capacity;
            for (_, id) in by_age.into_iter().take(excess) {
                self.records.remove(&id);
            }
        }
        let records = &self.records;
        self.updates.retain(|_, action| records.contains_key(action));
    }
}

/// Built-in listener keeping per-action timelines.
///
/// Register it on the bridge (and pass the bridge's bus to observer-side
/// batchers to see dispatch times as well).
pub struct TransactionTracker {
    ledger: Mutex<Ledger>,
    capacity: usize,
    max_age: Duration,
}

impl TransactionTracker {
    /// Keeps at most `capacity` records for up to five minutes.
    pub fn new(capacity: usize) -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            capacity: capacity.max(1),
            max_age: Duration::from_secs(300),
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// Timeline of `action_id`, if still tracked.
    pub fn get(&self, action_id: &str) -> Option<Transaction> {
        self.ledger.lock().records.get(action_id).cloned()
    }

    /// Phase durations of `action_id`, if still tracked.
    pub fn latency(&self, action_id: &str) -> Option<TransactionLatency> {
        self.ledger.lock().records.get(action_id).map(Transaction::latency)
    }

    /// Every tracked record, oldest first.
    pub fn snapshot(&self) -> Vec<Transaction> {
        let mut all: Vec<Transaction> = self.ledger.lock().records.values().cloned().collect();
        all.sort_by(|a, b| {
            a.first_seen()
                .cmp(&b.first_seen())
                .then_with(|| a.action_id.cmp(&b.action_id))
        });
        all
    }

    pub fn len(&self) -> usize {
        self.ledger.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ledger.lock().records.is_empty()
    }

    fn observe(&self, ev: &Event) {
        let mut ledger = self.ledger.lock();
        let before = ledger.records.len();
        match ev.kind {
            EventKind::ActionDispatched => {
                if let Some(r) = ledger.record(ev) {
                    r.dispatched_at.get_or_insert(ev.at);
                }
            }
            EventKind::ActionReceived => {
                if let Some(r) = ledger.record(ev) {
                    r.received_at.get_or_insert(ev.at);
                }
            }
            EventKind::ActionApplied | EventKind::ActionFailed => {
                if let Some(r) = ledger.record(ev) {
                    r.settled_at = Some(ev.at);
                    r.failed = ev.kind == EventKind::ActionFailed;
                }
            }
            EventKind::StateUpdateSent => {
                let (Some(update), Some(action)) = (ev.update.as_deref(), ev.action.as_deref()) else {
                    return;
                };
                ledger.updates.insert(update.to_string(), action.to_string());
                let early = ledger.early_acks.remove(update);
                if let Some(r) = ledger.record(ev) {
                    r.update_sent_at.get_or_insert(ev.at);
                    if let Some(at) = early {
                        r.acknowledged_at = r.acknowledged_at.max(Some(at));
                    }
                }
            }
            EventKind::StateUpdateAcknowledged => {
                let Some(update) = ev.update.as_deref() else {
                    return;
                };
                let Some(action) = ledger.updates.get(update).cloned() else {
                    ledger.early_acks.insert(update.to_string(), ev.at);
                    return;
                };
                if let Some(r) = ledger.records.get_mut(&action) {
                    r.acknowledged_at = r.acknowledged_at.max(Some(ev.at));
                }
            }
            _ => return,
        }
        if ledger.records.len() > before {
            ledger.prune(ev.at, self.max_age, self.capacity);
        }
    }
}

impl Default for TransactionTracker {
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl Listener for TransactionTracker {
    async fn on_event(&self, ev: &Event) {
        self.observe(ev);
    }

    fn name(&self) -> &'static str {
        "transactions"
    }
}
