//! Child agent runtime
//!
//! The async shell around [`ChildCore`]: connects to the coordinator's
//! socket, acknowledges as soon as it is addressable, and then loops over
//! ticks, user commands, and wire messages. All protocol rules live in the
//! core; this task only moves bytes and runs the clock.

use std::path::PathBuf;

use eyre::{Context, Result, eyre};
use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::sync::{Notify, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::protocol::{AttemptId, ChildToMaster, MasterToChild, NodeId, wire};

use super::config::ChildConfig;
use super::core::{ChildCore, Delivery};
use super::handle::AftHandle;

/// Commands from user code to the agent.
#[derive(Debug)]
pub(crate) enum AgentCommand {
    Send { recv_node: NodeId, payload: String },
}

/// One attempt's endpoint: heartbeats, numbered sends, ordered deliveries.
pub struct ChildAgent {
    core: ChildCore,
    config: ChildConfig,
    attempt_id: AttemptId,
    master_socket: PathBuf,
    cmd_rx: mpsc::Receiver<AgentCommand>,
    delivery_tx: mpsc::Sender<Delivery>,
}

impl ChildAgent {
    /// Create an agent for one attempt plus the user-facing handle.
    pub fn new(
        node_id: NodeId,
        attempt_id: AttemptId,
        master_socket: PathBuf,
        config: ChildConfig,
    ) -> (Self, AftHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.channel_buffer);
        let (delivery_tx, delivery_rx) = mpsc::channel(config.channel_buffer);

        let agent = Self {
            core: ChildCore::new(node_id),
            config,
            attempt_id,
            master_socket,
            cmd_rx,
            delivery_tx,
        };
        let handle = AftHandle::new(node_id, cmd_tx, delivery_rx);

        (agent, handle)
    }

    /// Run the agent until the coordinator connection drops or a routing
    /// violation makes continuing unsafe.
    pub async fn run(self) -> Result<()> {
        let Self {
            mut core,
            config,
            attempt_id,
            master_socket,
            mut cmd_rx,
            delivery_tx,
        } = self;

        let stream = UnixStream::connect(&master_socket)
            .await
            .context("Failed to connect to coordinator socket")?;
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        // Addressable now; announce before anything else.
        wire::send_message(
            &mut write_half,
            &ChildToMaster::ChildAck {
                attempt_id,
                address: format!("child-{attempt_id}"),
            },
        )
        .await?;

        info!(%attempt_id, node_id = %core.node_id(), "Agent connected");

        // Reads happen on their own task; `read_message` holds partial
        // lines across awaits and must not be raced in the select below.
        let (wire_tx, mut wire_rx) = mpsc::channel::<MasterToChild>(config.channel_buffer);
        let reader_task = tokio::spawn(async move {
            loop {
                match wire::read_message::<MasterToChild, _>(&mut reader).await {
                    Ok(Some(msg)) => {
                        if wire_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!(error = %e, "Wire read failed");
                        break;
                    }
                }
            }
        });

        let mut tick = tokio::time::interval(config.tick_interval());
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Fires when a delivery leaves further contiguous messages ready, so
        // they drain one per step without waiting out the tick.
        let retick = Notify::new();
        let mut commands_open = true;

        let result = loop {
            tokio::select! {
                _ = tick.tick() => {
                    core.advance_tick();
                    if let Err(e) = wire::send_message(&mut write_half, &ChildToMaster::Ping { attempt_id }).await {
                        break Err(e);
                    }
                    if let Some(msg) = core.ship_one() {
                        debug!(%attempt_id, "Shipping message");
                        if let Err(e) = wire::send_message(&mut write_half, &msg).await {
                            break Err(e);
                        }
                    }
                    deliver_step(&mut core, &delivery_tx, &retick).await;
                }

                _ = retick.notified() => {
                    deliver_step(&mut core, &delivery_tx, &retick).await;
                }

                cmd = cmd_rx.recv(), if commands_open => {
                    match cmd {
                        Some(AgentCommand::Send { recv_node, payload }) => {
                            core.enqueue(recv_node, payload);
                        }
                        None => {
                            // User handles all dropped; the attempt keeps
                            // heartbeating and receiving.
                            commands_open = false;
                        }
                    }
                }

                msg = wire_rx.recv() => {
                    match msg {
                        Some(message) => {
                            if let Err(violation) = core.on_wire(message) {
                                break Err(violation.into());
                            }
                            if core.has_deliverable() {
                                retick.notify_one();
                            }
                        }
                        None => break Err(eyre!("Coordinator connection lost")),
                    }
                }
            }
        };

        reader_task.abort();
        result
    }
}

/// Deliver at most one message to user code, scheduling a follow-up step if
/// more are already contiguous.
async fn deliver_step(core: &mut ChildCore, delivery_tx: &mpsc::Sender<Delivery>, retick: &Notify) {
    if let Some(delivery) = core.deliver_one() {
        debug!(msg_id = %delivery.msg_id, send_node = %delivery.send_node, "Delivering");
        if delivery_tx.send(delivery).await.is_err() {
            warn!("Delivery receiver dropped");
        }
        if core.has_deliverable() {
            retick.notify_one();
        }
    }
}
