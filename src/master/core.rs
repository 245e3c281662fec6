//! Coordinator state machine
//!
//! `MasterCore` owns all authoritative state: attempt records, the
//! node → current-attempt table, the append-only message buffer, and the id
//! counters. It advances in discrete steps: the runtime drains queued inputs
//! into `step`, which applies them, sweeps liveness, respawns dead nodes,
//! drives the spawning pipeline, assigns delivery sequence numbers, and
//! returns the effects to execute at the step boundary. No I/O happens here.
//!
//! Step order is fixed and load-bearing: acks (and their replay batches) are
//! processed before this step's `recv_id` assignments, so a message accepted
//! and assigned in the same step as an ack is forwarded exactly once.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::protocol::{AttemptId, ChildToMaster, MasterToChild, NodeId};

use super::attempt::{Attempt, AttemptStatus};
use super::buffer::{MessageBuffer, ReplayMismatch, StagedMessage};

/// One queued input for a coordinator step.
#[derive(Debug, Clone)]
pub enum MasterInput {
    /// A wire message from some attempt's connection.
    Message(ChildToMaster),
    /// The liveness clock fired; sweep heartbeats this step.
    LivenessTick,
}

/// An outbound effect, executed by the runtime at the step boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Spawn a child process for this attempt.
    Fork { attempt_id: AttemptId, node_id: NodeId },
    /// Send a wire message to this attempt's connection.
    Send {
        attempt_id: AttemptId,
        message: MasterToChild,
    },
    /// The attempt is dead; forget its route.
    DropRoute { attempt_id: AttemptId },
}

/// Coordinator counters, logged at shutdown.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MasterMetrics {
    pub pings: u64,
    pub messages_received: u64,
    pub messages_forwarded: u64,
    pub duplicates_dropped: u64,
    pub attempts_forked: u64,
    pub attempts_died: u64,
    pub replays: u64,
}

/// The coordinator's authoritative state and step function.
#[derive(Debug)]
pub struct MasterCore {
    ft_timeout: Duration,
    initial_data: String,
    attempts: HashMap<AttemptId, Attempt>,
    /// node_id → current attempt. Exactly one attempt per node is current.
    current: Vec<AttemptId>,
    buffer: MessageBuffer,
    next_attempt_id: u64,
    metrics: MasterMetrics,
}

impl MasterCore {
    /// Bootstrap with one `Init` attempt per node, `attempt_id == node_id`.
    pub fn new(node_count: u32, ft_timeout: Duration, initial_data: String, now: Instant) -> Self {
        let mut attempts = HashMap::new();
        let mut current = Vec::with_capacity(node_count as usize);
        for node in 0..node_count {
            let attempt_id = AttemptId(node as u64);
            attempts.insert(attempt_id, Attempt::new(attempt_id, NodeId(node), now));
            current.push(attempt_id);
        }

        Self {
            ft_timeout,
            initial_data,
            attempts,
            current,
            buffer: MessageBuffer::new(node_count as usize),
            next_attempt_id: node_count as u64,
            metrics: MasterMetrics::default(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.current.len()
    }

    pub fn metrics(&self) -> &MasterMetrics {
        &self.metrics
    }

    pub fn buffer(&self) -> &MessageBuffer {
        &self.buffer
    }

    pub fn attempt(&self, attempt_id: AttemptId) -> Option<&Attempt> {
        self.attempts.get(&attempt_id)
    }

    /// The current attempt for a node.
    pub fn current_attempt(&self, node: NodeId) -> &Attempt {
        &self.attempts[&self.current[node.index()]]
    }

    /// Advance one step. Inputs were queued since the previous step; `now`
    /// is the coordinator clock, which also timestamps heartbeats so the
    /// protocol never depends on child clocks.
    pub fn step(&mut self, now: Instant, inputs: Vec<MasterInput>) -> Result<Vec<Effect>, ReplayMismatch> {
        let mut effects = Vec::new();
        let mut sweep = false;

        for input in inputs {
            match input {
                MasterInput::Message(msg) => self.apply_message(now, msg, &mut effects)?,
                MasterInput::LivenessTick => sweep = true,
            }
        }

        if sweep {
            let dead = self.sweep_liveness(now, &mut effects);
            if !dead.is_empty() {
                self.respawn(dead, now);
            }
        }

        self.drive_spawn_pipeline(&mut effects);
        self.assign_and_forward(&mut effects);

        Ok(effects)
    }

    fn apply_message(
        &mut self,
        now: Instant,
        msg: ChildToMaster,
        effects: &mut Vec<Effect>,
    ) -> Result<(), ReplayMismatch> {
        match msg {
            ChildToMaster::Ping { attempt_id } => {
                self.metrics.pings += 1;
                // Recorded regardless of status; a dead attempt stays dead.
                if let Some(attempt) = self.attempts.get_mut(&attempt_id) {
                    attempt.last_ping = now;
                } else {
                    warn!(%attempt_id, "Ping from unknown attempt");
                }
            }

            ChildToMaster::ChildAck { attempt_id, address } => {
                let Some(attempt) = self.attempts.get_mut(&attempt_id) else {
                    warn!(%attempt_id, "Ack from unknown attempt");
                    return Ok(());
                };

                if attempt.status != AttemptStatus::Fork {
                    debug!(%attempt_id, status = ?attempt.status, "Ignoring ack for attempt not in Fork");
                    return Ok(());
                }

                attempt.set_status(AttemptStatus::Live);
                attempt.address = Some(address);
                attempt.last_ping = now;
                let node_id = attempt.node_id;

                let replay = self.buffer.replay_for(node_id);
                info!(%attempt_id, %node_id, rows = replay.len(), "Attempt live, replaying history");

                effects.push(Effect::Send {
                    attempt_id,
                    message: MasterToChild::InitialData {
                        payload: self.initial_data.clone(),
                    },
                });
                for row in replay {
                    effects.push(Effect::Send {
                        attempt_id,
                        message: MasterToChild::MsgRecv {
                            recv_id: row.recv_id,
                            recv_node: row.recv_node,
                            send_node: row.send_node,
                            payload: row.payload,
                        },
                    });
                }
                self.metrics.replays += 1;
            }

            ChildToMaster::MsgSend {
                send_id,
                recv_node,
                send_node,
                payload,
            } => {
                self.metrics.messages_received += 1;

                if recv_node.index() >= self.current.len() {
                    warn!(%send_node, %send_id, %recv_node, "Message for out-of-range node dropped");
                    return Ok(());
                }

                let fresh = self.buffer.intake(StagedMessage {
                    send_node,
                    send_id,
                    recv_node,
                    payload,
                })?;
                if fresh {
                    debug!(%send_node, %send_id, %recv_node, "Message staged");
                } else {
                    debug!(%send_node, %send_id, "Duplicate message dropped");
                    self.metrics.duplicates_dropped += 1;
                }
            }
        }

        Ok(())
    }

    /// Mark every monitored attempt with a lapsed heartbeat dead. Returns the
    /// dead attempt ids.
    fn sweep_liveness(&mut self, now: Instant, effects: &mut Vec<Effect>) -> Vec<AttemptId> {
        let mut dead = Vec::new();
        for attempt in self.attempts.values_mut() {
            if attempt.timed_out(now, self.ft_timeout) {
                let from = attempt.status;
                attempt.set_status(AttemptStatus::Dead);
                attempt.address = None;
                info!(
                    attempt_id = %attempt.attempt_id,
                    node_id = %attempt.node_id,
                    was = ?from,
                    "Attempt timed out"
                );
                effects.push(Effect::DropRoute {
                    attempt_id: attempt.attempt_id,
                });
                dead.push(attempt.attempt_id);
                self.metrics.attempts_died += 1;
            }
        }
        dead
    }

    /// Create a replacement attempt for each dead one. Fresh attempt ids are
    /// issued in sorted order of the dead ids, so concurrent failures get
    /// the same assignment no matter how the sweep happened to iterate.
    fn respawn(&mut self, mut dead: Vec<AttemptId>, now: Instant) {
        dead.sort_unstable();
        for old_id in dead {
            let node_id = self.attempts[&old_id].node_id;
            let new_id = AttemptId(self.next_attempt_id);
            self.next_attempt_id += 1;

            self.attempts.insert(new_id, Attempt::new(new_id, node_id, now));
            self.current[node_id.index()] = new_id;
            info!(old_attempt = %old_id, new_attempt = %new_id, %node_id, "Respawning node");
        }
    }

    /// Issue exactly one fork effect per `Init` attempt, transitioning it to
    /// `Fork` in the same step.
    fn drive_spawn_pipeline(&mut self, effects: &mut Vec<Effect>) {
        for node in 0..self.current.len() {
            let attempt_id = self.current[node];
            let attempt = self.attempts.get_mut(&attempt_id).expect("current attempt exists");
            if attempt.status == AttemptStatus::Init {
                attempt.set_status(AttemptStatus::Fork);
                effects.push(Effect::Fork {
                    attempt_id,
                    node_id: attempt.node_id,
                });
                self.metrics.attempts_forked += 1;
            }
        }
    }

    /// Run one buffer assignment step and forward each newly numbered row to
    /// its recipient's attempt if that attempt is live. Rows whose recipient
    /// is not live stay buffered and reach the node through replay.
    fn assign_and_forward(&mut self, effects: &mut Vec<Effect>) {
        for row in self.buffer.assign_step() {
            let attempt = &self.attempts[&self.current[row.recv_node.index()]];
            if attempt.status == AttemptStatus::Live {
                effects.push(Effect::Send {
                    attempt_id: attempt.attempt_id,
                    message: MasterToChild::MsgRecv {
                        recv_id: row.recv_id,
                        recv_node: row.recv_node,
                        send_node: row.send_node,
                        payload: row.payload,
                    },
                });
                self.metrics.messages_forwarded += 1;
            } else {
                debug!(
                    recv_node = %row.recv_node,
                    recv_id = %row.recv_id,
                    "Recipient not live, row buffered for replay"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RecvId, SendId};

    const TIMEOUT: Duration = Duration::from_secs(20);

    fn core(nodes: u32, now: Instant) -> MasterCore {
        MasterCore::new(nodes, TIMEOUT, "edb".to_string(), now)
    }

    fn ack(attempt_id: u64) -> MasterInput {
        MasterInput::Message(ChildToMaster::ChildAck {
            attempt_id: AttemptId(attempt_id),
            address: format!("child-{attempt_id}"),
        })
    }

    fn ping(attempt_id: u64) -> MasterInput {
        MasterInput::Message(ChildToMaster::Ping {
            attempt_id: AttemptId(attempt_id),
        })
    }

    fn msg(send_node: u32, send_id: u64, recv_node: u32, payload: &str) -> MasterInput {
        MasterInput::Message(ChildToMaster::MsgSend {
            send_id: SendId(send_id),
            recv_node: NodeId(recv_node),
            send_node: NodeId(send_node),
            payload: payload.to_string(),
        })
    }

    fn forks(effects: &[Effect]) -> Vec<(u64, u32)> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Fork { attempt_id, node_id } => Some((attempt_id.0, node_id.0)),
                _ => None,
            })
            .collect()
    }

    fn sends_to(effects: &[Effect], attempt: u64) -> Vec<&MasterToChild> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Send { attempt_id, message } if attempt_id.0 == attempt => Some(message),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_bootstrap_forks_every_node() {
        let t0 = Instant::now();
        let mut core = core(3, t0);

        let effects = core.step(t0, vec![]).unwrap();
        assert_eq!(forks(&effects), vec![(0, 0), (1, 1), (2, 2)]);

        for node in 0..3 {
            assert_eq!(core.current_attempt(NodeId(node)).status, AttemptStatus::Fork);
        }

        // Fork effects are one-shot.
        let effects = core.step(t0, vec![]).unwrap();
        assert!(effects.is_empty());
    }

    #[test]
    fn test_ack_moves_to_live_and_sends_initial_data() {
        let t0 = Instant::now();
        let mut core = core(2, t0);
        core.step(t0, vec![]).unwrap();

        let effects = core.step(t0, vec![ack(1)]).unwrap();
        assert_eq!(core.current_attempt(NodeId(1)).status, AttemptStatus::Live);
        assert_eq!(
            core.current_attempt(NodeId(1)).address.as_deref(),
            Some("child-1")
        );

        let sent = sends_to(&effects, 1);
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0],
            &MasterToChild::InitialData {
                payload: "edb".to_string()
            }
        );
    }

    #[test]
    fn test_ack_for_attempt_not_in_fork_is_ignored() {
        let t0 = Instant::now();
        let mut core = core(1, t0);
        core.step(t0, vec![]).unwrap();
        core.step(t0, vec![ack(0)]).unwrap();

        // Second ack: attempt already live.
        let effects = core.step(t0, vec![ack(0)]).unwrap();
        assert!(effects.is_empty());
        assert_eq!(core.metrics().replays, 1);
    }

    #[test]
    fn test_first_message_gets_ids_zero_and_forwards_to_live_recipient() {
        let t0 = Instant::now();
        let mut core = core(2, t0);
        core.step(t0, vec![]).unwrap();
        core.step(t0, vec![ack(0), ack(1)]).unwrap();

        let effects = core.step(t0, vec![msg(0, 0, 1, "hello")]).unwrap();
        let sent = sends_to(&effects, 1);
        assert_eq!(
            sent,
            vec![&MasterToChild::MsgRecv {
                recv_id: RecvId(0),
                recv_node: NodeId(1),
                send_node: NodeId(0),
                payload: "hello".to_string(),
            }]
        );
    }

    #[test]
    fn test_message_for_recipient_not_yet_live_waits_for_replay() {
        let t0 = Instant::now();
        let mut core = core(2, t0);
        core.step(t0, vec![]).unwrap();

        // Node 1 has not acked; the message is buffered, not forwarded.
        let effects = core.step(t0, vec![msg(0, 0, 1, "early")]).unwrap();
        assert!(sends_to(&effects, 1).is_empty());
        assert_eq!(core.buffer().len(), 1);

        // The ack replays it, after the initial data.
        let effects = core.step(t0, vec![ack(1)]).unwrap();
        let sent = sends_to(&effects, 1);
        assert_eq!(sent.len(), 2);
        assert!(matches!(sent[0], MasterToChild::InitialData { .. }));
        assert_eq!(
            sent[1],
            &MasterToChild::MsgRecv {
                recv_id: RecvId(0),
                recv_node: NodeId(1),
                send_node: NodeId(0),
                payload: "early".to_string(),
            }
        );
    }

    #[test]
    fn test_duplicate_message_is_dropped_once_stored() {
        let t0 = Instant::now();
        let mut core = core(2, t0);
        core.step(t0, vec![]).unwrap();
        core.step(t0, vec![ack(1)]).unwrap();

        core.step(t0, vec![msg(0, 0, 1, "hello")]).unwrap();
        let effects = core.step(t0, vec![msg(0, 0, 1, "hello")]).unwrap();

        assert!(sends_to(&effects, 1).is_empty());
        assert_eq!(core.buffer().len(), 1);
        assert_eq!(core.metrics().duplicates_dropped, 1);
    }

    #[test]
    fn test_mismatched_duplicate_is_fatal() {
        let t0 = Instant::now();
        let mut core = core(2, t0);
        core.step(t0, vec![]).unwrap();
        core.step(t0, vec![msg(0, 0, 1, "hello")]).unwrap();

        let err = core.step(t0, vec![msg(0, 0, 1, "tampered")]).unwrap_err();
        assert_eq!(err.send_node, NodeId(0));
        assert_eq!(err.send_id, SendId(0));
    }

    #[test]
    fn test_timeout_kills_and_respawns_in_one_step() {
        let t0 = Instant::now();
        let mut core = core(2, t0);
        core.step(t0, vec![]).unwrap();
        core.step(t0, vec![ack(0), ack(1)]).unwrap();

        // Node 0 keeps pinging; node 1 goes silent.
        let t1 = t0 + Duration::from_secs(15);
        core.step(t1, vec![ping(0)]).unwrap();

        let t2 = t0 + Duration::from_secs(25);
        let effects = core.step(t2, vec![ping(0), MasterInput::LivenessTick]).unwrap();

        assert!(effects.contains(&Effect::DropRoute { attempt_id: AttemptId(1) }));
        assert_eq!(forks(&effects), vec![(2, 1)]);

        let old = core.attempt(AttemptId(1)).unwrap();
        assert_eq!(old.status, AttemptStatus::Dead);
        assert!(old.address.is_none());

        let new = core.current_attempt(NodeId(1));
        assert_eq!(new.attempt_id, AttemptId(2));
        assert_eq!(new.status, AttemptStatus::Fork);
    }

    #[test]
    fn test_late_ping_cannot_resurrect_dead_attempt() {
        let t0 = Instant::now();
        let mut core = core(1, t0);
        core.step(t0, vec![]).unwrap();
        core.step(t0, vec![ack(0)]).unwrap();

        let t1 = t0 + Duration::from_secs(25);
        core.step(t1, vec![MasterInput::LivenessTick]).unwrap();
        assert_eq!(core.attempt(AttemptId(0)).unwrap().status, AttemptStatus::Dead);

        // The late ping is recorded but the status stays Dead, and the next
        // sweep does not re-kill it.
        let effects = core.step(t1, vec![ping(0), MasterInput::LivenessTick]).unwrap();
        assert_eq!(core.attempt(AttemptId(0)).unwrap().status, AttemptStatus::Dead);
        assert!(!effects.contains(&Effect::DropRoute { attempt_id: AttemptId(0) }));
    }

    #[test]
    fn test_concurrent_failures_respawn_in_attempt_id_order() {
        let t0 = Instant::now();
        let mut core = core(3, t0);
        core.step(t0, vec![]).unwrap();
        core.step(t0, vec![ack(0), ack(1), ack(2)]).unwrap();

        // Stagger one failure so the old attempt ids are out of node order:
        // node 2 dies first and comes back as attempt 3.
        let t1 = t0 + Duration::from_secs(25);
        core.step(t1, vec![ping(0), ping(1), MasterInput::LivenessTick]).unwrap();
        assert_eq!(core.current_attempt(NodeId(2)).attempt_id, AttemptId(3));
        core.step(t1, vec![ack(3)]).unwrap();

        // Now attempts {0 (node 0), 3 (node 2)} die in the same step. Sorted
        // old ids give node 0 → attempt 4, node 2 → attempt 5.
        let t2 = t1 + Duration::from_secs(25);
        core.step(t2, vec![ping(1), MasterInput::LivenessTick]).unwrap();

        assert_eq!(core.current_attempt(NodeId(0)).attempt_id, AttemptId(4));
        assert_eq!(core.current_attempt(NodeId(2)).attempt_id, AttemptId(5));
        assert_eq!(core.current_attempt(NodeId(1)).attempt_id, AttemptId(1));
    }

    #[test]
    fn test_replay_after_failover_covers_full_history() {
        let t0 = Instant::now();
        let mut core = core(2, t0);
        core.step(t0, vec![]).unwrap();
        core.step(t0, vec![ack(0), ack(1)]).unwrap();

        // Three messages for node 1, assigned over three steps.
        core.step(t0, vec![msg(0, 0, 1, "m0"), msg(0, 1, 1, "m1"), msg(0, 2, 1, "m2")])
            .unwrap();
        core.step(t0, vec![]).unwrap();
        core.step(t0, vec![]).unwrap();
        assert_eq!(core.buffer().len(), 3);

        // Node 1 dies and a successor acks.
        let t1 = t0 + Duration::from_secs(25);
        core.step(t1, vec![ping(0), MasterInput::LivenessTick]).unwrap();
        let effects = core.step(t1, vec![ack(2)]).unwrap();

        let sent = sends_to(&effects, 2);
        assert_eq!(sent.len(), 4);
        assert!(matches!(sent[0], MasterToChild::InitialData { .. }));
        for (i, message) in sent[1..].iter().enumerate() {
            assert_eq!(
                *message,
                &MasterToChild::MsgRecv {
                    recv_id: RecvId(i as u64),
                    recv_node: NodeId(1),
                    send_node: NodeId(0),
                    payload: format!("m{i}"),
                }
            );
        }
    }

    #[test]
    fn test_late_message_from_superseded_attempt_is_accepted() {
        let t0 = Instant::now();
        let mut core = core(2, t0);
        core.step(t0, vec![]).unwrap();
        core.step(t0, vec![ack(0), ack(1)]).unwrap();
        core.step(t0, vec![msg(0, 0, 1, "before-death")]).unwrap();

        // Node 0's attempt dies; its already-sent message redelivers late.
        let t1 = t0 + Duration::from_secs(25);
        core.step(t1, vec![ping(1), MasterInput::LivenessTick]).unwrap();
        core.step(t1, vec![msg(0, 0, 1, "before-death")]).unwrap();

        assert_eq!(core.metrics().duplicates_dropped, 1);
        assert_eq!(core.buffer().len(), 1);
    }

    #[test]
    fn test_distinct_recipients_assigned_same_step() {
        let t0 = Instant::now();
        let mut core = core(3, t0);
        core.step(t0, vec![]).unwrap();
        core.step(t0, vec![ack(0), ack(1), ack(2)]).unwrap();

        let effects = core
            .step(t0, vec![msg(0, 0, 1, "to-1"), msg(0, 1, 2, "to-2")])
            .unwrap();
        assert_eq!(sends_to(&effects, 1).len(), 1);
        assert_eq!(sends_to(&effects, 2).len(), 1);
    }

    #[test]
    fn test_out_of_range_recipient_is_dropped() {
        let t0 = Instant::now();
        let mut core = core(2, t0);
        core.step(t0, vec![]).unwrap();

        core.step(t0, vec![msg(0, 0, 9, "nowhere")]).unwrap();
        assert_eq!(core.buffer().len(), 0);
        assert_eq!(core.buffer().staged_len(), 0);
    }

    #[test]
    fn test_attempt_ids_strictly_increase() {
        let t0 = Instant::now();
        let mut core = core(2, t0);
        core.step(t0, vec![]).unwrap();

        let mut seen = vec![
            core.current_attempt(NodeId(0)).attempt_id,
            core.current_attempt(NodeId(1)).attempt_id,
        ];

        let mut t = t0;
        for _ in 0..3 {
            t += Duration::from_secs(25);
            core.step(t, vec![MasterInput::LivenessTick]).unwrap();
            seen.push(core.current_attempt(NodeId(0)).attempt_id);
            seen.push(core.current_attempt(NodeId(1)).attempt_id);
        }

        let mut sorted = seen.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), seen.len());
    }
}
