//! # Observer subscriptions and state diffing.
//!
//! - [`SubscriptionManager`]: per-observer [`Interest`], merge rules, diff-and-notify
//! - [`Delivery`]: partial state computed for one observer
//! - [`get_path`] / [`extract`]: dotted-path helpers over JSON state

mod interest;
mod manager;
mod path;

pub use interest::Interest;
pub use manager::{Delivery, SubscriptionCallback, SubscriptionHandle, SubscriptionManager};
pub use path::{extract, get_path};
