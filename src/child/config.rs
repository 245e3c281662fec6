//! Child agent configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Child agent timing and buffer knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildConfig {
    /// The agent's tick in milliseconds: each tick emits one heartbeat and
    /// ships at most one queued message
    #[serde(rename = "tick-interval-ms", default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Buffer size for the user-facing send/delivery channels
    #[serde(rename = "channel-buffer", default = "default_channel_buffer")]
    pub channel_buffer: usize,
}

fn default_tick_interval_ms() -> u64 {
    3_000
}

fn default_channel_buffer() -> usize {
    256
}

impl Default for ChildConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            channel_buffer: default_channel_buffer(),
        }
    }
}

impl ChildConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}
