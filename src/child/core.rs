//! Child agent state machine
//!
//! Owns the attempt-local cursors: the outgoing sequence counter, the
//! outbound buffer, the receive buffer, and the delivery watermark. Like the
//! coordinator core, this is pure state with no I/O; the agent shell feeds
//! it wire messages and ticks.
//!
//! Sends are numbered one per tick. User code may enqueue several messages
//! in the same tick; the one shipped is the minimum of
//! `(enqueue_tick, payload, recv_node)`, which makes `send_id` assignment
//! independent of arrival order within a tick. The rest drain on later
//! ticks. Deliveries mirror this: one per step, strictly contiguous in
//! `recv_id`, and held entirely until the initial bulk data has arrived.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::protocol::{ChildToMaster, MasterToChild, NodeId, RecvId, SendId};

/// A delivery handed to user code, in strictly increasing gap-free
/// `msg_id` order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub send_node: NodeId,
    pub msg_id: RecvId,
    pub payload: String,
}

/// A delivery addressed to some other node reached this one. Fatal: the
/// routing table upstream is corrupt and nothing this attempt delivers can
/// be trusted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("delivery for {addressed_to} arrived at {node_id}")]
pub struct RoutingViolation {
    pub node_id: NodeId,
    pub addressed_to: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Outgoing {
    recv_node: NodeId,
    payload: String,
    enqueue_tick: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Incoming {
    send_node: NodeId,
    payload: String,
}

/// Attempt-local protocol state.
#[derive(Debug)]
pub struct ChildCore {
    node_id: NodeId,
    tick: u64,
    next_send_id: u64,
    outbox: Vec<Outgoing>,
    recv_buf: BTreeMap<u64, Incoming>,
    /// Highest `recv_id` delivered to user code; `None` until the first.
    recv_done_max: Option<u64>,
    got_initial_data: bool,
}

impl ChildCore {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            tick: 0,
            next_send_id: 0,
            outbox: Vec::new(),
            recv_buf: BTreeMap::new(),
            recv_done_max: None,
            got_initial_data: false,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn got_initial_data(&self) -> bool {
        self.got_initial_data
    }

    pub fn pending_out(&self) -> usize {
        self.outbox.len()
    }

    /// Advance the logical clock. Messages enqueued between two calls share
    /// one enqueue tick.
    pub fn advance_tick(&mut self) {
        self.tick += 1;
    }

    /// Queue an outgoing message for some node.
    pub fn enqueue(&mut self, recv_node: NodeId, payload: String) {
        self.outbox.push(Outgoing {
            recv_node,
            payload,
            enqueue_tick: self.tick,
        });
    }

    /// Ship at most one queued message: the minimum of
    /// `(enqueue_tick, payload, recv_node)` gets the next `send_id`.
    pub fn ship_one(&mut self) -> Option<ChildToMaster> {
        let idx = self
            .outbox
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (a.enqueue_tick, a.payload.as_str(), a.recv_node).cmp(&(b.enqueue_tick, b.payload.as_str(), b.recv_node))
            })
            .map(|(i, _)| i)?;

        let out = self.outbox.remove(idx);
        let send_id = SendId(self.next_send_id);
        self.next_send_id += 1;

        Some(ChildToMaster::MsgSend {
            send_id,
            recv_node: out.recv_node,
            send_node: self.node_id,
            payload: out.payload,
        })
    }

    /// Apply one wire message from the coordinator.
    pub fn on_wire(&mut self, msg: MasterToChild) -> Result<(), RoutingViolation> {
        match msg {
            MasterToChild::InitialData { .. } => {
                self.got_initial_data = true;
            }
            MasterToChild::MsgRecv {
                recv_id,
                recv_node,
                send_node,
                payload,
            } => {
                if recv_node != self.node_id {
                    return Err(RoutingViolation {
                        node_id: self.node_id,
                        addressed_to: recv_node,
                    });
                }

                // Replay can redeliver history already handed to user code.
                if self.recv_done_max.is_some_and(|max| recv_id.0 <= max) {
                    return Ok(());
                }

                self.recv_buf.entry(recv_id.0).or_insert(Incoming { send_node, payload });
            }
        }
        Ok(())
    }

    fn next_expected(&self) -> u64 {
        self.recv_done_max.map_or(0, |max| max + 1)
    }

    /// Whether the next contiguous delivery is sitting in the buffer.
    pub fn has_deliverable(&self) -> bool {
        self.got_initial_data && self.recv_buf.contains_key(&self.next_expected())
    }

    /// Deliver at most one message: the contiguous successor of the
    /// watermark, and only once the initial data is in.
    pub fn deliver_one(&mut self) -> Option<Delivery> {
        if !self.got_initial_data {
            return None;
        }

        let next = self.next_expected();
        let incoming = self.recv_buf.remove(&next)?;
        self.recv_done_max = Some(next);

        Some(Delivery {
            send_node: incoming.send_node,
            msg_id: RecvId(next),
            payload: incoming.payload,
        })
    }
}
