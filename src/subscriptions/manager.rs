//! # Subscription manager.
//!
//! Per-observer key interest plus the diff step that turns a state change
//! into minimal per-observer deliveries.
//!
//! ```text
//! notify(prev, next)
//!   for observer in subscriptions (ascending id):
//!     All          → deliver next
//!     Keys(k)      → any k changed (deep equality)? deliver extract(next, k) unless empty
//!     None         → skip
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;

use super::interest::Interest;
use super::path::{any_changed, extract};
use crate::actions::{ObserverId, State};

/// Receives an observer's partial state.
pub type SubscriptionCallback = Arc<dyn Fn(&State) + Send + Sync>;

/// Partial state computed for one observer.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub observer: ObserverId,
    pub state: State,
}

struct Subscription {
    interest: Interest,
    callback: Option<SubscriptionCallback>,
}

type Registry = Mutex<BTreeMap<ObserverId, Subscription>>;

/// Undoes one `subscribe` call.
pub struct SubscriptionHandle {
    observer: ObserverId,
    interest: Interest,
    registry: Weak<Registry>,
}

impl SubscriptionHandle {
    pub fn observer(&self) -> ObserverId {
        self.observer
    }

    /// Interest this handle added.
    pub fn interest(&self) -> &Interest {
        &self.interest
    }

    /// Full-state handles remove the observer; key handles remove their keys.
    pub fn unsubscribe(self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        match &self.interest {
            Interest::All => {
                remove_interest(&registry, self.observer, None);
            }
            Interest::Keys(keys) => {
                remove_interest(&registry, self.observer, Some(keys.as_slice()));
            }
            Interest::None => {}
        }
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("observer", &self.observer)
            .field("interest", &self.interest)
            .finish()
    }
}

/// Registry of observer interests.
#[derive(Default)]
pub struct SubscriptionManager {
    registry: Arc<Registry>,
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds interest for `observer`, merging with what it already has.
    pub fn subscribe(
        &self,
        observer: ObserverId,
        keys: Option<&[String]>,
        callback: Option<SubscriptionCallback>,
    ) -> SubscriptionHandle {
        let interest = Interest::from_keys(keys);
        {
            let mut reg = self.registry.lock();
            match reg.get_mut(&observer) {
                Some(sub) => {
                    let merged = std::mem::replace(&mut sub.interest, Interest::None)
                        .merge(interest.clone());
                    sub.interest = merged;
                    if callback.is_some() {
                        sub.callback = callback;
                    }
                }
                None => {
                    reg.insert(
                        observer,
                        Subscription {
                            interest: interest.clone(),
                            callback,
                        },
                    );
                }
            }
        }
        tracing::debug!(observer, ?interest, "subscribed");
        SubscriptionHandle {
            observer,
            interest,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Removes `keys` from the observer's interest, or the observer itself when `keys` is `None`.
    pub fn unsubscribe(&self, observer: ObserverId, keys: Option<&[String]>) -> bool {
        remove_interest(&self.registry, observer, keys)
    }

    /// Current interest of `observer`.
    pub fn get_subscription(&self, observer: ObserverId) -> Option<Interest> {
        self.registry.lock().get(&observer).map(|s| s.interest.clone())
    }

    /// Subscribed observers in ascending order.
    pub fn observers(&self) -> Vec<ObserverId> {
        self.registry.lock().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.registry.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.lock().is_empty()
    }

    /// Computes the deliveries for a state change without invoking callbacks.
    pub fn collect(&self, prev: &State, next: &State) -> Vec<Delivery> {
        self.registry
            .lock()
            .iter()
            .filter_map(|(&observer, sub)| {
                partial_for(&sub.interest, prev, next).map(|state| Delivery { observer, state })
            })
            .collect()
    }

    /// Invokes the callbacks of the given deliveries. Returns the observers reached.
    pub fn deliver(&self, deliveries: &[Delivery]) -> Vec<ObserverId> {
        let targets: Vec<(SubscriptionCallback, &Delivery)> = {
            let reg = self.registry.lock();
            deliveries
                .iter()
                .filter_map(|d| {
                    reg.get(&d.observer)
                        .and_then(|s| s.callback.clone())
                        .map(|cb| (cb, d))
                })
                .collect()
        };
        targets
            .into_iter()
            .map(|(cb, d)| {
                cb(&d.state);
                d.observer
            })
            .collect()
    }

    /// Diffs `prev` against `next` and calls every relevant observer's callback.
    pub fn notify(&self, prev: &State, next: &State) -> Vec<ObserverId> {
        let deliveries = self.collect(prev, next);
        self.deliver(&deliveries)
    }
}

fn partial_for(interest: &Interest, prev: &State, next: &State) -> Option<State> {
    match interest {
        Interest::All => Some(next.clone()),
        Interest::None => None,
        Interest::Keys(keys) => {
            if !any_changed(prev, next, keys) {
                return None;
            }
            let partial = extract(next, keys);
            (!partial.is_empty()).then_some(Value::Object(partial))
        }
    }
}

fn remove_interest(registry: &Registry, observer: ObserverId, keys: Option<&[String]>) -> bool {
    let mut reg = registry.lock();
    match keys {
        None => reg.remove(&observer).is_some(),
        Some(keys) => match reg.get_mut(&observer) {
            Some(sub) if matches!(sub.interest, Interest::Keys(_)) => {
                let current = std::mem::replace(&mut sub.interest, Interest::None);
                sub.interest = current.without(keys);
                true
            }
            _ => false,
        },
    }
}
