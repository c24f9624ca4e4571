//! # Transport contracts.
//!
//! - [`ObserverTransport`]: owner side: pushes state updates to observers and
//!   reports which observers are still alive.
//! - [`BatchTransport`]: observer side: carries one batch of actions to the
//!   owner and returns the per-action results.

use async_trait::async_trait;
use serde_json::Value;

use crate::actions::ObserverId;
use crate::batcher::{BatchRequest, BatchResponse};

/// Best-effort message delivery to observers.
pub trait ObserverTransport: Send + Sync + 'static {
    /// Sends `payload` on `channel`. Returns `false` if the observer is unreachable.
    fn send(&self, observer: ObserverId, channel: &str, payload: &Value) -> bool;

    /// Observers the host still considers alive.
    fn active_observer_ids(&self) -> Vec<ObserverId>;

    /// Direct liveness check, used when [`active_observer_ids`](Self::active_observer_ids)
    /// looks suspiciously empty.
    fn is_alive(&self, _observer: ObserverId) -> bool {
        true
    }
}

/// Carries batches across the process boundary.
#[async_trait]
pub trait BatchTransport: Send + Sync + 'static {
    /// Sends one batch and waits for the receiver's results.
    async fn send_batch(&self, request: BatchRequest) -> anyhow::Result<BatchResponse>;
}
