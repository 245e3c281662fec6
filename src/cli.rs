//! CLI command definitions

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// aft - exactly-once ordered delivery over supervised worker processes
#[derive(Parser)]
#[command(
    name = "aft",
    about = "Exactly-once, ordered message delivery over supervised worker processes",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run the coordinator in the foreground
    Run,

    /// Load configuration and print the effective values
    Check,

    /// Internal: run one child attempt (used by the coordinator's spawner)
    #[command(hide = true)]
    RunChild {
        /// This attempt's node
        #[arg(long = "node-id")]
        node_id: u32,

        /// This attempt's identity
        #[arg(long = "attempt-id")]
        attempt_id: u64,

        /// Path to the coordinator socket
        #[arg(long = "master-socket")]
        master_socket: PathBuf,
    },
}
