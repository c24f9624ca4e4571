//! # Action batching (submission side).
//!
//! - [`ActionBatcher`]: per-observer coalescing queue with window/size/priority flushes
//! - [`BatchPending`]: per-action deferred result
//! - [`BatchRequest`] / [`BatchResponse`]: transport-agnostic wire format

mod action_batcher;
mod wire;

pub use action_batcher::{ActionBatcher, BatchPending, BatcherStats};
pub use wire::{BatchItem, BatchRequest, BatchResponse, BatchResult};
