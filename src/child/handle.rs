//! User-code interface to a running child agent
//!
//! The handle is cloneable and can be passed into user tasks; clones share
//! the delivery stream. Sends are enqueued and shipped by the agent one per
//! tick; deliveries arrive in strictly increasing gap-free `msg_id` order.

use std::sync::Arc;

use eyre::{Result, eyre};
use tokio::sync::{Mutex, mpsc};

use crate::protocol::NodeId;

use super::agent::AgentCommand;
use super::core::Delivery;

/// Handle for user code at a child node.
#[derive(Clone)]
pub struct AftHandle {
    node_id: NodeId,
    cmd_tx: mpsc::Sender<AgentCommand>,
    deliveries: Arc<Mutex<mpsc::Receiver<Delivery>>>,
}

impl AftHandle {
    pub(crate) fn new(
        node_id: NodeId,
        cmd_tx: mpsc::Sender<AgentCommand>,
        deliveries: mpsc::Receiver<Delivery>,
    ) -> Self {
        Self {
            node_id,
            cmd_tx,
            deliveries: Arc::new(Mutex::new(deliveries)),
        }
    }

    /// This handle's node.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Enqueue a message for delivery to `recv_node`.
    ///
    /// Once accepted the message will reach some attempt of the target node
    /// exactly once; there is no cancellation.
    pub async fn send(&self, recv_node: NodeId, payload: impl Into<String>) -> Result<()> {
        self.cmd_tx
            .send(AgentCommand::Send {
                recv_node,
                payload: payload.into(),
            })
            .await
            .map_err(|_| eyre!("Agent channel closed"))
    }

    /// Receive the next delivery.
    ///
    /// Returns `None` once the agent has stopped and the stream is drained.
    pub async fn recv(&self) -> Option<Delivery> {
        let mut rx = self.deliveries.lock().await;
        rx.recv().await
    }

    /// Receive without blocking; `None` if nothing is ready.
    pub fn try_recv(&self) -> Option<Delivery> {
        let mut rx = self.deliveries.try_lock().ok()?;
        rx.try_recv().ok()
    }
}
