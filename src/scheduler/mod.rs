//! # Task scheduling.
//!
//! - [`Task`]: unit of work with priority, lock owner and key scope
//! - [`TaskHandle`]: deferred result of an enqueued task
//! - [`TaskScheduler`]: stable priority queue plus running set, gated by the
//!   [`LockManager`](crate::LockManager)

mod queue;
mod task;

pub use queue::{QueueStatus, TaskScheduler};
pub use task::{Task, TaskFuture, TaskHandle};
