//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Coordinator timing and buffer knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    /// Interval between liveness sweeps in milliseconds
    #[serde(rename = "liveness-interval-ms", default = "default_liveness_interval_ms")]
    pub liveness_interval_ms: u64,

    /// Heartbeat timeout in milliseconds; a monitored attempt that stays
    /// silent this long is declared dead
    #[serde(rename = "ft-timeout-ms", default = "default_ft_timeout_ms")]
    pub ft_timeout_ms: u64,

    /// Buffer size for the coordinator input channel
    #[serde(rename = "channel-buffer", default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

fn default_liveness_interval_ms() -> u64 {
    2_000
}

fn default_ft_timeout_ms() -> u64 {
    20_000
}

fn default_channel_buffer() -> usize {
    1024
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            liveness_interval_ms: default_liveness_interval_ms(),
            ft_timeout_ms: default_ft_timeout_ms(),
            channel_buffer: default_channel_buffer(),
        }
    }
}

impl MasterConfig {
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    pub fn ft_timeout(&self) -> Duration {
        Duration::from_millis(self.ft_timeout_ms)
    }
}
