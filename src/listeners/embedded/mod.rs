//! # Built-in listeners
//!
//! - [`TransactionTracker`]: per-action timelines and phase latencies.
//! - [`LogWriter`]: renders events through `tracing` (demo/debug, feature `logging`).

#[cfg(feature = "logging")]
mod log;
mod transactions;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use transactions::{Transaction, TransactionLatency, TransactionTracker};
