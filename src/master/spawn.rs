//! Child process management — the host-collaborator seam
//!
//! The coordinator asks a [`Spawner`] to create and destroy child processes;
//! everything else about process mechanics stays behind this trait, which is
//! also what lets the cluster tests run agents as in-process tasks.
//!
//! Exit notifications are shutdown bookkeeping only: a reaped pid is skipped
//! when terminating the fleet. Protocol liveness is owned entirely by the
//! heartbeat timeout and never consults process state.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Context, Result};
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::protocol::{AttemptId, NodeId};

/// How child attempts are created and destroyed.
#[async_trait]
pub trait Spawner: Send + Sync {
    /// Create a child bound to this attempt's identity. The spawn completes
    /// before the coordinator observes the fork effect as done.
    async fn spawn(&self, attempt_id: AttemptId, node_id: NodeId) -> Result<()>;

    /// Terminate every still-running child. Called once, at shutdown.
    async fn shutdown(&self);
}

#[derive(Default)]
struct SpawnerInner {
    running: HashMap<AttemptId, u32>,
    exited: HashSet<u32>,
}

/// Spawns real child processes by re-invoking the current executable with
/// the hidden `run-child` subcommand.
pub struct ProcessSpawner {
    master_socket: PathBuf,
    child_env: HashMap<String, String>,
    inner: Arc<Mutex<SpawnerInner>>,
}

impl ProcessSpawner {
    /// `child_env` is the opaque option map handed to every spawned child.
    pub fn new(master_socket: PathBuf, child_env: HashMap<String, String>) -> Self {
        Self {
            master_socket,
            child_env,
            inner: Arc::new(Mutex::new(SpawnerInner::default())),
        }
    }

    /// Pids of children that have been observed exiting.
    pub async fn exited_pids(&self) -> HashSet<u32> {
        self.inner.lock().await.exited.clone()
    }
}

#[async_trait]
impl Spawner for ProcessSpawner {
    async fn spawn(&self, attempt_id: AttemptId, node_id: NodeId) -> Result<()> {
        let exe = std::env::current_exe().context("Failed to get current executable")?;

        let mut child = Command::new(&exe)
            .arg("run-child")
            .arg("--node-id")
            .arg(node_id.0.to_string())
            .arg("--attempt-id")
            .arg(attempt_id.0.to_string())
            .arg("--master-socket")
            .arg(&self.master_socket)
            .envs(&self.child_env)
            .stdin(Stdio::null())
            .spawn()
            .context("Failed to spawn child process")?;

        let pid = child
            .id()
            .ok_or_else(|| eyre::eyre!("Child exited before a pid was observed"))?;
        self.inner.lock().await.running.insert(attempt_id, pid);
        info!(%attempt_id, %node_id, pid, "Spawned child");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let status = child.wait().await;
            debug!(pid, ?status, "Child exited");
            inner.lock().await.exited.insert(pid);
        });

        Ok(())
    }

    async fn shutdown(&self) {
        let inner = self.inner.lock().await;
        let targets: Vec<u32> = inner
            .running
            .values()
            .copied()
            .filter(|pid| !inner.exited.contains(pid))
            .collect();
        drop(inner);

        if targets.is_empty() {
            return;
        }

        info!(count = targets.len(), "Terminating children");
        for &pid in &targets {
            if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!(pid, error = %e, "SIGTERM failed");
            }
        }

        // Grace window, then force-kill stragglers.
        let mut attempts = 0;
        while targets.iter().any(|&pid| is_process_running(pid)) && attempts < 20 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            attempts += 1;
        }

        for &pid in &targets {
            if is_process_running(pid) {
                warn!(pid, "Child did not stop gracefully, sending SIGKILL");
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
            }
        }
    }
}

/// Check whether a process exists without affecting it (signal 0).
fn is_process_running(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}
