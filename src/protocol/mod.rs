//! Shared protocol surface: identifiers, wire messages, and framing
//!
//! The coordinator and the child agent are independent state machines; this
//! module is the only code both of them consume.

pub mod ids;
pub mod messages;
pub mod wire;

pub use ids::{AttemptId, NodeId, RecvId, SendId};
pub use messages::{ChildToMaster, MasterToChild};
