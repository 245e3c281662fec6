//! The coordinator's message buffer
//!
//! All user messages ever accepted live here, keyed by `(send_node, send_id)`.
//! The buffer is append-only: once a row is inserted it is never mutated or
//! removed, which is what makes full replay to a replacement attempt possible.
//!
//! Intake is two-phase. A new message first lands in a staging area; each
//! step, at most one staged message per distinct recipient is assigned the
//! recipient's next `recv_id`, picked by minimum `(send_node, send_id)`. The
//! sort-and-pick-one rule makes assignment a pure function of the inputs,
//! independent of intra-step arrival order.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::protocol::{NodeId, RecvId, SendId};

/// A duplicate `msg-send` whose fields disagree with the stored row. Fatal:
/// it means a sender replayed different content under the same sequence
/// number, and the exactly-once guarantee no longer holds.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("redelivery of message ({send_node}, {send_id}) disagrees with the stored row")]
pub struct ReplayMismatch {
    pub send_node: NodeId,
    pub send_id: SendId,
}

/// A buffered row with its assigned delivery sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub recv_node: NodeId,
    pub recv_id: RecvId,
    pub payload: String,
}

/// An accepted message awaiting `recv_id` assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedMessage {
    pub send_node: NodeId,
    pub send_id: SendId,
    pub recv_node: NodeId,
    pub payload: String,
}

/// A freshly assigned row, ready to forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assigned {
    pub send_node: NodeId,
    pub send_id: SendId,
    pub recv_node: NodeId,
    pub recv_id: RecvId,
    pub payload: String,
}

/// Append-only buffer plus staging area and per-recipient counters.
#[derive(Debug)]
pub struct MessageBuffer {
    msg_buf: BTreeMap<(NodeId, SendId), StoredMessage>,
    staging: Vec<StagedMessage>,
    next_recv_id: Vec<u64>,
}

impl MessageBuffer {
    pub fn new(node_count: usize) -> Self {
        Self {
            msg_buf: BTreeMap::new(),
            staging: Vec::new(),
            next_recv_id: vec![0; node_count],
        }
    }

    /// Accept an incoming message, suppressing duplicates.
    ///
    /// Returns `Ok(true)` if the message is new and was staged, `Ok(false)`
    /// if it is a faithful duplicate of a stored or staged row.
    pub fn intake(&mut self, msg: StagedMessage) -> Result<bool, ReplayMismatch> {
        if let Some(stored) = self.msg_buf.get(&(msg.send_node, msg.send_id)) {
            if stored.recv_node == msg.recv_node && stored.payload == msg.payload {
                return Ok(false);
            }
            return Err(ReplayMismatch {
                send_node: msg.send_node,
                send_id: msg.send_id,
            });
        }

        if let Some(staged) = self
            .staging
            .iter()
            .find(|s| s.send_node == msg.send_node && s.send_id == msg.send_id)
        {
            if staged.recv_node == msg.recv_node && staged.payload == msg.payload {
                return Ok(false);
            }
            return Err(ReplayMismatch {
                send_node: msg.send_node,
                send_id: msg.send_id,
            });
        }

        self.staging.push(msg);
        Ok(true)
    }

    /// Run one assignment step: for each distinct recipient with staged
    /// messages, move exactly one (minimum `(send_node, send_id)`) into the
    /// buffer under the recipient's next `recv_id`.
    pub fn assign_step(&mut self) -> Vec<Assigned> {
        let mut recipients: Vec<NodeId> = self.staging.iter().map(|s| s.recv_node).collect();
        recipients.sort_unstable();
        recipients.dedup();

        let mut assigned = Vec::with_capacity(recipients.len());
        for recv_node in recipients {
            let idx = self
                .staging
                .iter()
                .enumerate()
                .filter(|(_, s)| s.recv_node == recv_node)
                .min_by_key(|(_, s)| (s.send_node, s.send_id))
                .map(|(i, _)| i)
                .expect("recipient taken from staging");

            let staged = self.staging.remove(idx);
            let recv_id = RecvId(self.next_recv_id[recv_node.index()]);
            self.next_recv_id[recv_node.index()] += 1;

            self.msg_buf.insert(
                (staged.send_node, staged.send_id),
                StoredMessage {
                    recv_node,
                    recv_id,
                    payload: staged.payload.clone(),
                },
            );

            assigned.push(Assigned {
                send_node: staged.send_node,
                send_id: staged.send_id,
                recv_node,
                recv_id,
                payload: staged.payload,
            });
        }

        assigned
    }

    /// Every buffered row destined for `node`, in `recv_id` order.
    pub fn replay_for(&self, node: NodeId) -> Vec<Assigned> {
        let mut rows: Vec<Assigned> = self
            .msg_buf
            .iter()
            .filter(|(_, stored)| stored.recv_node == node)
            .map(|(&(send_node, send_id), stored)| Assigned {
                send_node,
                send_id,
                recv_node: stored.recv_node,
                recv_id: stored.recv_id,
                payload: stored.payload.clone(),
            })
            .collect();
        rows.sort_by_key(|row| row.recv_id);
        rows
    }

    pub fn next_recv_id(&self, node: NodeId) -> u64 {
        self.next_recv_id[node.index()]
    }

    pub fn len(&self) -> usize {
        self.msg_buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.msg_buf.is_empty()
    }

    pub fn staged_len(&self) -> usize {
        self.staging.len()
    }
}
