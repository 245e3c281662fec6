//! Coordinator runtime
//!
//! The async shell around [`MasterCore`]: accepts child connections, drains
//! queued wire messages and clock ticks into core steps, and executes the
//! emitted effects. All buffering between steps happens on the input
//! channel; the core itself never suspends.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use eyre::{Result, eyre};
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::protocol::{AttemptId, ChildToMaster, MasterToChild, wire};

use super::config::MasterConfig;
use super::core::{Effect, MasterCore, MasterInput, MasterMetrics};
use super::spawn::Spawner;

/// Requests into the coordinator runtime.
enum RuntimeInput {
    /// A wire message from some attempt's connection.
    Wire(ChildToMaster),
    /// A connection acknowledged; route this attempt's traffic through it.
    Route {
        attempt_id: AttemptId,
        tx: mpsc::UnboundedSender<MasterToChild>,
    },
    /// Snapshot the metrics.
    GetMetrics {
        reply_tx: oneshot::Sender<MasterMetrics>,
    },
    /// Stop the coordinator.
    Shutdown,
}

/// Cloneable handle for controlling a running coordinator.
#[derive(Clone)]
pub struct MasterHandle {
    tx: mpsc::Sender<RuntimeInput>,
}

impl MasterHandle {
    /// Request a graceful stop: children terminated, socket removed.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(RuntimeInput::Shutdown)
            .await
            .map_err(|_| eyre!("Coordinator channel closed"))
    }

    /// Snapshot the coordinator's counters.
    pub async fn metrics(&self) -> Result<MasterMetrics> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(RuntimeInput::GetMetrics { reply_tx })
            .await
            .map_err(|_| eyre!("Coordinator channel closed"))?;
        reply_rx.await.map_err(|_| eyre!("Coordinator shutdown before reply"))
    }
}

/// The coordinator process: listener, clock, core, and routes.
pub struct MasterRuntime {
    core: MasterCore,
    config: MasterConfig,
    spawner: Arc<dyn Spawner>,
    socket_path: PathBuf,
    /// Taken by `run` when the accept loop starts.
    listener: Option<UnixListener>,
    input_tx: mpsc::Sender<RuntimeInput>,
    input_rx: mpsc::Receiver<RuntimeInput>,
    routes: HashMap<AttemptId, mpsc::UnboundedSender<MasterToChild>>,
}

impl MasterRuntime {
    /// Bind the coordinator socket and bootstrap the initial attempts.
    pub fn bind(
        node_count: u32,
        initial_data: String,
        socket_path: PathBuf,
        config: MasterConfig,
        spawner: Arc<dyn Spawner>,
    ) -> Result<Self> {
        let listener = wire::bind_listener(&socket_path)?;
        let (input_tx, input_rx) = mpsc::channel(config.channel_buffer);
        let core = MasterCore::new(node_count, config.ft_timeout(), initial_data, Instant::now());

        Ok(Self {
            core,
            config,
            spawner,
            socket_path,
            listener: Some(listener),
            input_tx,
            input_rx,
            routes: HashMap::new(),
        })
    }

    /// A handle for shutdown and metrics.
    pub fn handle(&self) -> MasterHandle {
        MasterHandle {
            tx: self.input_tx.clone(),
        }
    }

    /// Run until shutdown is requested or a fatal protocol error surfaces.
    pub async fn run(mut self) -> Result<()> {
        let listener = self.listener.take().expect("listener present until run");
        let accept_task = tokio::spawn(accept_loop(listener, self.input_tx.clone()));

        info!(nodes = self.core.node_count(), socket = ?self.socket_path, "Coordinator started");

        let mut liveness = tokio::time::interval(self.config.liveness_interval());
        liveness.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // First step forks the bootstrap attempts.
        let result = 'run: {
            if let Err(e) = self.drive(vec![]).await {
                break 'run Err(e);
            }

            loop {
                tokio::select! {
                    _ = liveness.tick() => {
                        if let Err(e) = self.drive(vec![MasterInput::LivenessTick]).await {
                            break 'run Err(e);
                        }
                    }

                    Some(first) = self.input_rx.recv() => {
                        // Everything queued since the last step becomes one
                        // step's inputs.
                        let mut inputs = Vec::new();
                        let mut shutdown = false;
                        self.absorb(first, &mut inputs, &mut shutdown);
                        while let Ok(next) = self.input_rx.try_recv() {
                            self.absorb(next, &mut inputs, &mut shutdown);
                        }

                        if let Err(e) = self.drive(inputs).await {
                            break 'run Err(e);
                        }
                        if shutdown {
                            info!("Coordinator shutting down");
                            break 'run Ok(());
                        }
                    }
                }
            }
        };

        accept_task.abort();
        self.spawner.shutdown().await;
        wire::cleanup_socket(&self.socket_path);
        info!(metrics = ?self.core.metrics(), "Coordinator stopped");

        result
    }

    fn absorb(&mut self, input: RuntimeInput, inputs: &mut Vec<MasterInput>, shutdown: &mut bool) {
        match input {
            RuntimeInput::Wire(msg) => inputs.push(MasterInput::Message(msg)),
            RuntimeInput::Route { attempt_id, tx } => {
                self.routes.insert(attempt_id, tx);
            }
            RuntimeInput::GetMetrics { reply_tx } => {
                let _ = reply_tx.send(self.core.metrics().clone());
            }
            RuntimeInput::Shutdown => *shutdown = true,
        }
    }

    async fn drive(&mut self, inputs: Vec<MasterInput>) -> Result<()> {
        let effects = self.core.step(Instant::now(), inputs)?;

        for effect in effects {
            match effect {
                Effect::Fork { attempt_id, node_id } => {
                    // A failed fork leaves the attempt in Fork; the heartbeat
                    // timeout declares it dead and respawn retries.
                    if let Err(e) = self.spawner.spawn(attempt_id, node_id).await {
                        warn!(%attempt_id, %node_id, error = %e, "Fork failed");
                    }
                }

                Effect::Send { attempt_id, message } => {
                    if let Some(tx) = self.routes.get(&attempt_id) {
                        if tx.send(message).is_err() {
                            debug!(%attempt_id, "Route closed");
                        }
                    } else {
                        debug!(%attempt_id, "No route for attempt");
                    }
                }

                Effect::DropRoute { attempt_id } => {
                    self.routes.remove(&attempt_id);
                }
            }
        }

        Ok(())
    }
}

/// Accept child connections for the lifetime of the coordinator.
async fn accept_loop(listener: UnixListener, input_tx: mpsc::Sender<RuntimeInput>) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(connection_task(stream, input_tx.clone()));
            }
            Err(e) => {
                warn!(error = %e, "Accept failed");
            }
        }
    }
}

/// Pump one child connection: wire messages in, routed messages out. The
/// route is attached when the connection acknowledges, so replay lands on
/// the stream that sent the ack.
async fn connection_task(stream: UnixStream, input_tx: mpsc::Sender<RuntimeInput>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let (route_tx, mut route_rx) = mpsc::unbounded_channel::<MasterToChild>();

    let writer_task = tokio::spawn(async move {
        while let Some(msg) = route_rx.recv().await {
            if wire::send_message(&mut write_half, &msg).await.is_err() {
                break;
            }
        }
    });

    loop {
        match wire::read_message::<ChildToMaster, _>(&mut reader).await {
            Ok(Some(msg)) => {
                if let ChildToMaster::ChildAck { attempt_id, .. } = &msg {
                    let route = RuntimeInput::Route {
                        attempt_id: *attempt_id,
                        tx: route_tx.clone(),
                    };
                    if input_tx.send(route).await.is_err() {
                        break;
                    }
                }
                if input_tx.send(RuntimeInput::Wire(msg)).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                debug!("Connection closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Dropping connection");
                break;
            }
        }
    }

    writer_task.abort();
}
