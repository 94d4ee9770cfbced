//! Service module - name resolution and message dispatch.
//!
//! Provides:
//! - [`ServiceRegistry`] - maps service names to per-session atoms and
//!   versions, and atoms to handlers
//! - [`ServiceContext`] - lets a handler send messages as its service
//! - [`Messenger`] - carries handler-emitted frames back to the event loop

mod context;
mod registry;

pub use crate::protocol::ServiceInfo;
pub use context::{wrap_message, Messenger, ServiceContext};
pub use registry::{ServiceHandler, ServiceRegistry};
