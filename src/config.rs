//! Configuration types and loading

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::child::ChildConfig;
use crate::master::MasterConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of worker nodes; node ids are `[0, node_count)`
    #[serde(rename = "node-count")]
    pub node_count: u32,

    /// Opaque option map exported to every spawned child as environment
    /// variables
    #[serde(rename = "deploy-child-opts")]
    pub deploy_child_opts: HashMap<String, String>,

    /// Opaque bulk payload broadcast to every freshly forked child before
    /// normal delivery begins
    #[serde(rename = "initial-data")]
    pub initial_data: String,

    /// Directory for the coordinator socket
    #[serde(rename = "run-dir")]
    pub run_dir: PathBuf,

    /// Coordinator knobs
    pub master: MasterConfig,

    /// Child agent knobs
    pub child: ChildConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node_count: 2,
            deploy_child_opts: HashMap::new(),
            initial_data: String::new(),
            run_dir: PathBuf::from("/tmp/aft"),
            master: MasterConfig::default(),
            child: ChildConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain: explicit path, `./aft.yml`,
    /// then the user config directory, then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from("aft.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("aft").join("aft.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject configurations the protocol cannot run under.
    pub fn validate(&self) -> Result<()> {
        if self.node_count == 0 {
            return Err(eyre::eyre!("node-count must be at least 1"));
        }
        if self.master.ft_timeout_ms <= self.child.tick_interval_ms {
            return Err(eyre::eyre!(
                "ft-timeout-ms ({}) must exceed the child tick interval ({})",
                self.master.ft_timeout_ms,
                self.child.tick_interval_ms
            ));
        }
        Ok(())
    }

    /// Path of the coordinator socket for this configuration.
    pub fn master_socket(&self) -> PathBuf {
        crate::protocol::wire::master_socket_path(&self.run_dir)
    }
}
