//! # Bridge runtime configuration.
//!
//! Provides [`BridgeConfig`], centralized settings for the bridge core, and
//! [`BatcherConfig`] for the submission-side batcher.
//!
//! ## Sentinel values
//! - `max_observers = 0` → unlimited observer registries
//! - `sweep_interval = 0s` → no background maintenance loop
//! - `eviction_grace = 0s` → evict finished thunks right after acknowledgements settle

use std::time::Duration;

/// Global configuration for the bridge.
///
/// ## Field semantics
/// - `bus_capacity`: Event bus ring buffer size (min 1; clamped by Bus)
/// - `default_priority`: Priority of tasks created for thunk actions
/// - `bypass_priority`: Priority of tasks created for bypass thunks
/// - `eviction_grace`: Delay between final acknowledgement and thunk eviction
/// - `ack_max_age`: Age after which unacknowledged state updates are dropped
/// - `thunk_max_age`: Age after which finished thunks are force-evicted by the sweep
/// - `sweep_interval`: Period of the maintenance loop (`0s` = disabled)
/// - `max_observers`: Bound on tracked observer registries (`0` = unlimited)
#[derive(Clone, Debug)]
pub struct BridgeConfig {
    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Slow listeners that lag behind more than `bus_capacity` messages will
    /// receive `Lagged` and skip older items.
    pub bus_capacity: usize,

    /// Priority assigned to tasks of regular thunks.
    pub default_priority: i32,

    /// Priority assigned to tasks of bypass thunks.
    pub bypass_priority: i32,

    /// Grace period before a finished thunk record is evicted.
    pub eviction_grace: Duration,

    /// Maximum age of a tracked state update before the sweep drops it.
    pub ack_max_age: Duration,

    /// Maximum age of a finished thunk before the sweep drops it.
    pub thunk_max_age: Duration,

    /// Period of the background maintenance loop.
    pub sweep_interval: Duration,

    /// Maximum number of live observer registries.
    pub max_observers: usize,
}

impl BridgeConfig {
    /// Returns the observer limit as an `Option`.
    ///
    /// - `None` → unlimited
    /// - `Some(n)` → at most `n` observers tracked at once
    #[inline]
    pub fn observer_limit(&self) -> Option<usize> {
        if self.max_observers == 0 {
            None
        } else {
            Some(self.max_observers)
        }
    }

    /// Returns the maintenance period as an `Option` (`None` = disabled).
    #[inline]
    pub fn maintenance_interval(&self) -> Option<Duration> {
        if self.sweep_interval == Duration::ZERO {
            None
        } else {
            Some(self.sweep_interval)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for BridgeConfig {
    /// Default configuration:
    ///
    /// - `bus_capacity = 1024`
    /// - `default_priority = 0`, `bypass_priority = 100`
    /// - `eviction_grace = 500ms`
    /// - `ack_max_age = 30s`, `thunk_max_age = 5min`
    /// - `sweep_interval = 10s`
    /// - `max_observers = 256`
    fn default() -> Self {
        Self {
            bus_capacity: 1024,
            default_priority: 0,
            bypass_priority: 100,
            eviction_grace: Duration::from_millis(500),
            ack_max_age: Duration::from_secs(30),
            thunk_max_age: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(10),
            max_observers: 256,
        }
    }
}

/// Configuration of an [`ActionBatcher`](crate::ActionBatcher).
#[derive(Clone, Debug)]
pub struct BatcherConfig {
    /// Time window measured from the first queued item until the flush.
    pub window: Duration,

    /// Queue size that triggers an immediate flush (min 1).
    pub max_batch_size: usize,

    /// Items with `priority >= priority_flush_threshold` flush immediately.
    pub priority_flush_threshold: i32,
}

impl BatcherConfig {
    /// Returns the batch size clamped to a minimum of 1.
    #[inline]
    pub fn max_batch_size_clamped(&self) -> usize {
        self.max_batch_size.max(1)
    }
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_millis(16),
            max_batch_size: 50,
            priority_flush_threshold: 80,
        }
    }
}
