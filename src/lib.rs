//! aft - Atomic Fault Tolerance
//!
//! A reliable, ordered, exactly-once message-delivery substrate for a fixed
//! set of worker nodes supervised by a central coordinator. Workers run as
//! child processes, heartbeat the coordinator, and are respawned as fresh
//! "attempts" when presumed dead, with their full message history replayed
//! to the successor in original delivery order.
//!
//! # Core Concepts
//!
//! - **Deterministic numbering**: send- and receive-side sequence numbers
//!   are pure functions of the inputs, independent of arrival order within
//!   a step
//! - **Replay over recovery**: the coordinator's message buffer is
//!   append-only and canonical; a replacement attempt rebuilds its state by
//!   replaying it
//! - **Heartbeat-owned liveness**: process exits are shutdown bookkeeping;
//!   only a lapsed heartbeat declares an attempt dead
//! - **Gap-free delivery**: user code observes messages in strictly
//!   increasing contiguous order, across restarts and redeliveries
//!
//! # Modules
//!
//! - [`protocol`] - identifiers, wire messages, and framing shared by both
//!   endpoints
//! - [`master`] - the coordinator state machine and its runtime
//! - [`child`] - the per-attempt agent and the user-facing handle
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod child;
pub mod cli;
pub mod config;
pub mod master;
pub mod protocol;

// Re-export commonly used types
pub use child::{AftHandle, ChildAgent, ChildConfig, ChildCore, Delivery, RoutingViolation};
pub use config::Config;
pub use master::{
    Attempt, AttemptStatus, Effect, MasterConfig, MasterCore, MasterHandle, MasterInput, MasterMetrics, MasterRuntime,
    ProcessSpawner, ReplayMismatch, Spawner,
};
pub use protocol::{AttemptId, ChildToMaster, MasterToChild, NodeId, RecvId, SendId};
