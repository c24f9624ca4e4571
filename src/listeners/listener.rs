//! # Core listener trait
//!
//! `Listener` is the extension point for plugging telemetry sinks (debug
//! sidecars, metrics, logs) into the bridge. Each listener is driven by a
//! dedicated worker loop fed by a bounded queue that is owned by the
//! [`ListenerSet`](crate::ListenerSet).
//!
//! ## Contract
//! - Implementations may be slow (I/O, batching) – they do **not** block the
//!   publisher nor other listeners, and never sit in a correctness path.
//! - Each listener **declares** its preferred queue capacity via
//!   [`Listener::queue_capacity`]. If a queue overflows, events for that
//!   listener are **dropped**.
//!
//! ## Example
//! ```rust
//! use bridgevisor::{Event, EventKind, Listener};
//!
//! struct AckCounter(std::sync::atomic::AtomicUsize);
//!
//! #[async_trait::async_trait]
//! impl Listener for AckCounter {
//!     async fn on_event(&self, ev: &Event) {
//!         if ev.kind == EventKind::StateUpdateAcknowledged {
//!             self.0.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
//!         }
//!     }
//!     fn name(&self) -> &'static str { "ack-counter" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Contract for event listeners.
///
/// Called from a listener-dedicated worker task. Implementations should avoid
/// blocking the async runtime.
#[async_trait]
pub trait Listener: Send + Sync + 'static {
    /// Handle a single event for this listener.
    async fn on_event(&self, event: &Event);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this listener's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
