//! SDK configuration
//!
//! Capacities and limits of one device session. All values have working
//! defaults; a TOML file can override any subset.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    /// File is not valid TOML for this schema
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Session capacities and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// Receive ring buffer capacity, bytes
    pub rx_buffer_capacity: usize,
    /// Longest packet any grammar may claim; bounds incomplete-claim greed
    pub packet_max_length: usize,
    /// Subscriber registry capacity per dispatcher
    pub subscriber_capacity: usize,
    /// Shared measurement sink capacity; 0 disables decode-to-sink
    pub measurement_queue_capacity: usize,
    /// Bridge reassembly buffer capacity, bytes
    pub assembly_capacity: usize,
    /// Seconds an unanswered command stays matchable
    pub command_stale_secs: u64,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            rx_buffer_capacity: 8192,
            packet_max_length: 1024,
            subscriber_capacity: 8,
            measurement_queue_capacity: 32,
            assembly_capacity: 4096,
            command_stale_secs: 5,
        }
    }
}

impl SdkConfig {
    /// Load a configuration from a TOML file.
    ///
    /// Missing keys fall back to their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}
