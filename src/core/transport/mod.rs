//! Transport layer for sensor byte streams
//!
//! Supports:
//! - Serial ports (RS-232, RS-485, USB-Serial)
//! - File replay of a recorded byte log
//!
//! Transports are blocking and driven from the session's receive thread:
//! `receive` returns whatever bytes are available within a short internal
//! timeout, possibly none.

mod replay;
mod serial;

pub use replay::{ReplayConfig, ReplayTransport};
pub use serial::{SerialConfig, SerialFlowControl, SerialParity, SerialTransport};

use bytes::Bytes;
use std::fmt;
use thiserror::Error;

/// Transport type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// Serial port
    Serial,
    /// File replay
    Replay,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Serial => write!(f, "Serial"),
            Self::Replay => write!(f, "Replay"),
        }
    }
}

/// Transport error types.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Not connected
    #[error("Not connected")]
    NotConnected,

    /// Stream ended (remote closed, or replay file exhausted)
    #[error("Disconnected")]
    Disconnected,

    /// Send error
    #[error("Send error: {0}")]
    SendError(String),
}

/// Transport statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportStats {
    /// Bytes sent
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_received: u64,
    /// Receive calls that returned data
    pub chunks_received: u64,
    /// Errors observed
    pub errors: u64,
}

/// Blocking transport over a sensor byte stream.
pub trait Transport: Send {
    /// Open the connection.
    fn connect(&mut self) -> Result<(), TransportError>;

    /// Close the connection.
    fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Check if connected.
    fn is_connected(&self) -> bool;

    /// Send raw bytes to the device.
    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError>;

    /// Receive available bytes.
    ///
    /// Returns an empty chunk when nothing arrived within the internal
    /// timeout; `TransportError::Disconnected` when the stream has ended.
    fn receive(&mut self) -> Result<Bytes, TransportError>;

    /// Get transport type.
    fn transport_type(&self) -> TransportType;

    /// Get connection info string.
    fn connection_info(&self) -> String;

    /// Get statistics.
    fn stats(&self) -> TransportStats;
}
