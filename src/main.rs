//! aft - exactly-once ordered delivery over supervised worker processes
//!
//! CLI entry point for the coordinator and for spawned child attempts.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;

use aft::child::ChildAgent;
use aft::cli::{Cli, Command};
use aft::config::Config;
use aft::master::{MasterRuntime, ProcessSpawner, Spawner};
use aft::protocol::{AttemptId, NodeId};

fn setup_logging(verbose: bool) {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run => cmd_run(config).await,
        Command::Check => cmd_check(&config),
        Command::RunChild {
            node_id,
            attempt_id,
            master_socket,
        } => cmd_run_child(&config, node_id, attempt_id, master_socket).await,
    }
}

/// Run the coordinator until a shutdown signal arrives.
async fn cmd_run(config: Config) -> Result<()> {
    config.validate()?;

    let socket_path = config.master_socket();
    let spawner: Arc<dyn Spawner> = Arc::new(ProcessSpawner::new(
        socket_path.clone(),
        config.deploy_child_opts.clone(),
    ));

    let runtime = MasterRuntime::bind(
        config.node_count,
        config.initial_data.clone(),
        socket_path,
        config.master.clone(),
        spawner,
    )?;

    let handle = runtime.handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = handle.shutdown().await;
    });

    runtime.run().await
}

/// Print the effective configuration.
fn cmd_check(config: &Config) -> Result<()> {
    config.validate()?;
    let rendered = serde_yaml::to_string(config).context("Failed to render configuration")?;
    print!("{rendered}");
    Ok(())
}

/// Run one child attempt. The default worker logs every delivery; embedders
/// use [`aft::child::AftHandle`] from their own tasks instead.
async fn cmd_run_child(config: &Config, node_id: u32, attempt_id: u64, master_socket: PathBuf) -> Result<()> {
    let (agent, handle) = ChildAgent::new(
        NodeId(node_id),
        AttemptId(attempt_id),
        master_socket,
        config.child.clone(),
    );

    let worker = tokio::spawn(async move {
        while let Some(delivery) = handle.recv().await {
            info!(
                send_node = %delivery.send_node,
                msg_id = %delivery.msg_id,
                payload = %delivery.payload,
                "Delivered"
            );
        }
    });

    let result = agent.run().await;
    worker.abort();
    result
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}
