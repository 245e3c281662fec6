//! Protocol identifiers
//!
//! Four id spaces, kept as distinct newtypes so a send-side sequence number
//! can never be handed to receive-side code:
//!
//! - `NodeId`: dense, fixed at bootstrap, `[0, node_count)`
//! - `AttemptId`: issued monotonically by the coordinator; unique over all
//!   attempts ever made. Initial attempts have `attempt_id == node_id`.
//! - `SendId`: per-sender sequence, assigned by the sending child from 0
//! - `RecvId`: per-recipient sequence, assigned by the coordinator from 0;
//!   this is the order user code observes deliveries in

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical worker node, fixed for the lifetime of the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub u32);

impl NodeId {
    /// Index into per-node tables.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// One process instance running a node's logic. A node may have many
/// attempts over time; at most one is current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

/// Sender-local monotonic sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SendId(pub u64);

impl fmt::Display for SendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Recipient-local monotonic sequence number; determines delivery order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecvId(pub u64);

impl RecvId {
    pub fn next(self) -> RecvId {
        RecvId(self.0 + 1)
    }
}

impl fmt::Display for RecvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}
