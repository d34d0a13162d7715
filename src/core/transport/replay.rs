//! File replay transport
//!
//! Feeds a recorded raw byte log through the pipeline as if it were
//! arriving from a device. Chunks are sliced zero-copy out of the loaded
//! log; an optional pacing delay between chunks approximates live timing.

use super::{Transport, TransportError, TransportStats, TransportType};
use bytes::Bytes;
use std::path::PathBuf;
use std::time::Duration;

/// Replay configuration.
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    /// Path of the raw byte log
    pub path: PathBuf,
    /// Bytes delivered per receive call
    pub chunk_size: usize,
    /// Optional delay between chunks
    pub pace: Option<Duration>,
}

impl ReplayConfig {
    /// Create a configuration replaying `path` as fast as possible.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            chunk_size: 256,
            pace: None,
        }
    }

    /// Set the chunk size.
    #[must_use]
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Set the inter-chunk pacing delay.
    #[must_use]
    pub fn pace(mut self, pace: Duration) -> Self {
        self.pace = Some(pace);
        self
    }
}

/// Transport replaying a recorded byte log.
pub struct ReplayTransport {
    config: ReplayConfig,
    data: Bytes,
    cursor: usize,
    connected: bool,
    stats: TransportStats,
}

impl ReplayTransport {
    /// Create a transport that loads the configured file on `connect`.
    pub fn new(config: ReplayConfig) -> Self {
        Self {
            config,
            data: Bytes::new(),
            cursor: 0,
            connected: false,
            stats: TransportStats::default(),
        }
    }

    /// Create a transport over an in-memory byte log.
    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            config: ReplayConfig::new(""),
            data: data.into(),
            cursor: 0,
            connected: false,
            stats: TransportStats::default(),
        }
    }

    /// Bytes remaining to be replayed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.cursor
    }
}

impl Transport for ReplayTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        if self.data.is_empty() && !self.config.path.as_os_str().is_empty() {
            let raw = std::fs::read(&self.config.path)?;
            self.data = Bytes::from(raw);
        }
        self.cursor = 0;
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        // Commands have nowhere to go during replay; count and drop
        self.stats.bytes_sent += data.len() as u64;
        Ok(data.len())
    }

    fn receive(&mut self) -> Result<Bytes, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        if self.cursor >= self.data.len() {
            return Err(TransportError::Disconnected);
        }
        if let Some(pace) = self.config.pace {
            std::thread::sleep(pace);
        }

        let end = (self.cursor + self.config.chunk_size).min(self.data.len());
        let chunk = self.data.slice(self.cursor..end);
        self.cursor = end;
        self.stats.bytes_received += chunk.len() as u64;
        self.stats.chunks_received += 1;
        Ok(chunk)
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Replay
    }

    fn connection_info(&self) -> String {
        format!("replay:{}", self.config.path.display())
    }

    fn stats(&self) -> TransportStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replays_in_chunks_until_disconnected() {
        let mut transport = ReplayTransport::from_bytes(vec![1u8, 2, 3, 4, 5]);
        transport.config.chunk_size = 2;
        transport.connect().unwrap();

        assert_eq!(&transport.receive().unwrap()[..], &[1, 2]);
        assert_eq!(&transport.receive().unwrap()[..], &[3, 4]);
        assert_eq!(&transport.receive().unwrap()[..], &[5]);
        assert!(matches!(
            transport.receive(),
            Err(TransportError::Disconnected)
        ));
        assert_eq!(transport.stats().bytes_received, 5);
    }

    #[test]
    fn test_loads_file_on_connect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.bin");
        std::fs::write(&path, [0xAA, 0xBB, 0xCC]).unwrap();

        let mut transport = ReplayTransport::new(ReplayConfig::new(&path).chunk_size(16));
        transport.connect().unwrap();
        assert_eq!(&transport.receive().unwrap()[..], &[0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn test_send_is_counted_and_dropped() {
        let mut transport = ReplayTransport::from_bytes(vec![1u8]);
        transport.connect().unwrap();
        transport.send(b"$NLRRG,05*00\r\n").unwrap();
        assert_eq!(transport.stats().bytes_sent, 14);
    }
}
