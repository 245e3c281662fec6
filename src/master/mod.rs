//! The coordinator: the single global authority for attempts and messages
//!
//! Spawns child attempts, tracks liveness by heartbeat, assigns delivery
//! sequence numbers, buffers every message for replay, and respawns failed
//! nodes. [`core`] holds the protocol rules as a pure step function;
//! [`runtime`] is the async shell that feeds it.

pub mod attempt;
pub mod buffer;
pub mod config;
pub mod core;
pub mod runtime;
pub mod spawn;

pub use attempt::{Attempt, AttemptStatus};
pub use buffer::{MessageBuffer, ReplayMismatch};
pub use config::MasterConfig;
pub use core::{Effect, MasterCore, MasterInput, MasterMetrics};
pub use runtime::{MasterHandle, MasterRuntime};
pub use spawn::{ProcessSpawner, Spawner};
