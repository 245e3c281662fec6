//! The child agent: one attempt's endpoint
//!
//! Numbers outgoing messages, heartbeats the coordinator, and hands incoming
//! messages to user code in strict gap-free order. [`core`] holds the
//! protocol rules; [`agent`] is the async shell; [`handle`] is what user
//! code sees.

pub mod agent;
pub mod config;
pub mod core;
pub mod handle;

pub use agent::ChildAgent;
pub use config::ChildConfig;
pub use core::{ChildCore, Delivery, RoutingViolation};
pub use handle::AftHandle;
