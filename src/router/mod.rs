//! # Action routing and execution.
//!
//! - [`ActionRouter`]: decides between immediate execution and scheduling
//! - [`ActionExecutor`]: applies one action to the state adapter
//! - [`Middleware`]: before/after hooks around every routed action
//! - [`current_thunk`], [`current_action`]: attribution for state-change listeners

mod executor;
mod middleware;
mod routing;

pub use executor::{ActionExecutor, current_action, current_thunk};
pub use middleware::Middleware;
pub use routing::ActionRouter;
