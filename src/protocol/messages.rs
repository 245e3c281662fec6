//! Wire message types shared by the coordinator and child agents
//!
//! One line of JSON per message over the attempt's socket. Both endpoints
//! consume this module; neither defines message shapes of its own.

use serde::{Deserialize, Serialize};

use super::ids::{AttemptId, NodeId, RecvId, SendId};

/// Messages sent by a child attempt to the coordinator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ChildToMaster {
    /// Heartbeat, emitted on the child's tick.
    Ping {
        #[serde(rename = "attempt-id")]
        attempt_id: AttemptId,
    },

    /// First message on a fresh connection: the attempt is addressable.
    ChildAck {
        #[serde(rename = "attempt-id")]
        attempt_id: AttemptId,
        address: String,
    },

    /// An outgoing user message, numbered by the sending child.
    MsgSend {
        #[serde(rename = "send-id")]
        send_id: SendId,
        #[serde(rename = "recv-node")]
        recv_node: NodeId,
        #[serde(rename = "send-node")]
        send_node: NodeId,
        payload: String,
    },
}

/// Messages sent by the coordinator to a child attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum MasterToChild {
    /// A numbered delivery for this node.
    MsgRecv {
        #[serde(rename = "recv-id")]
        recv_id: RecvId,
        #[serde(rename = "recv-node")]
        recv_node: NodeId,
        #[serde(rename = "send-node")]
        send_node: NodeId,
        payload: String,
    },

    /// One-shot bulk bootstrap state; deliveries are held until it arrives.
    InitialData { payload: String },
}
