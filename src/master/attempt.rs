//! Per-attempt records and their lifecycle
//!
//! Every attempt moves through `Init → Fork → Live → Dead`, with `Fork → Dead`
//! for attempts that never acknowledge. `Dead` is terminal: a node that lost
//! its attempt gets a brand-new attempt, never a resurrected one.

use std::time::Instant;

use crate::protocol::{AttemptId, NodeId};

/// Lifecycle state of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    /// Created, fork effect not yet issued.
    Init,
    /// Child process spawned, no acknowledgment yet.
    Fork,
    /// Acknowledged and addressable.
    Live,
    /// Timed out. Terminal.
    Dead,
}

impl AttemptStatus {
    /// Whether the liveness sweep watches this attempt's heartbeat.
    pub fn is_monitored(self) -> bool {
        matches!(self, AttemptStatus::Fork | AttemptStatus::Live)
    }

    /// Legal transitions of the lifecycle.
    pub fn can_transition_to(self, next: AttemptStatus) -> bool {
        matches!(
            (self, next),
            (AttemptStatus::Init, AttemptStatus::Fork)
                | (AttemptStatus::Fork, AttemptStatus::Live)
                | (AttemptStatus::Fork, AttemptStatus::Dead)
                | (AttemptStatus::Live, AttemptStatus::Dead)
        )
    }
}

/// Coordinator-side record of one attempt.
#[derive(Debug, Clone)]
pub struct Attempt {
    pub attempt_id: AttemptId,
    pub node_id: NodeId,
    pub status: AttemptStatus,
    /// Present only once a `child-ack` has been received.
    pub address: Option<String>,
    /// Heartbeat timestamp, assigned from the coordinator's clock.
    pub last_ping: Instant,
}

impl Attempt {
    /// A fresh attempt in `Init`. The creation time seeds the heartbeat so
    /// an attempt that never acknowledges still times out.
    pub fn new(attempt_id: AttemptId, node_id: NodeId, now: Instant) -> Self {
        Self {
            attempt_id,
            node_id,
            status: AttemptStatus::Init,
            address: None,
            last_ping: now,
        }
    }

    /// Guarded transition. Returns false and leaves the record untouched if
    /// the transition is illegal.
    pub fn set_status(&mut self, next: AttemptStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        true
    }

    /// Whether the heartbeat has lapsed past the timeout.
    pub fn timed_out(&self, now: Instant, timeout: std::time::Duration) -> bool {
        self.status.is_monitored() && now.duration_since(self.last_ping) > timeout
    }
}
