//! Serial port transport implementation

use super::{Transport, TransportError, TransportStats, TransportType};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::time::Duration;

/// Serial port flow control type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialFlowControl {
    /// No flow control
    #[default]
    None,
    /// Hardware flow control (RTS/CTS)
    Hardware,
    /// Software flow control (XON/XOFF)
    Software,
}

/// Serial port parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl std::str::FromStr for SerialParity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            _ => Ok(Self::None),
        }
    }
}

/// Serial port configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Flow control
    pub flow_control: SerialFlowControl,
    /// Read timeout per receive call, milliseconds
    pub read_timeout_ms: u64,
}

impl SerialConfig {
    /// Create a new serial configuration with default settings.
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: SerialFlowControl::None,
            read_timeout_ms: 10,
        }
    }

    /// Set data bits.
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set stop bits.
    #[must_use]
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Set parity.
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }

    /// Set flow control.
    #[must_use]
    pub fn flow_control(mut self, flow: SerialFlowControl) -> Self {
        self.flow_control = flow;
        self
    }

    /// Set the per-receive read timeout.
    #[must_use]
    pub fn read_timeout_ms(mut self, timeout: u64) -> Self {
        self.read_timeout_ms = timeout;
        self
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("/dev/ttyUSB0", 115200)
    }
}

/// Serial port transport.
pub struct SerialTransport {
    config: SerialConfig,
    port: Option<Box<dyn SerialPort>>,
    stats: TransportStats,
    read_buf: Vec<u8>,
}

impl SerialTransport {
    /// Create a new serial transport.
    pub fn new(config: SerialConfig) -> Self {
        Self {
            config,
            port: None,
            stats: TransportStats::default(),
            read_buf: vec![0u8; 4096],
        }
    }

    fn map_data_bits(bits: u8) -> DataBits {
        match bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        }
    }

    fn map_stop_bits(bits: u8) -> StopBits {
        match bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        }
    }

    fn map_parity(parity: SerialParity) -> Parity {
        match parity {
            SerialParity::None => Parity::None,
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
        }
    }

    fn map_flow_control(flow: SerialFlowControl) -> FlowControl {
        match flow {
            SerialFlowControl::None => FlowControl::None,
            SerialFlowControl::Hardware => FlowControl::Hardware,
            SerialFlowControl::Software => FlowControl::Software,
        }
    }
}

impl Transport for SerialTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        let port = serialport::new(&self.config.port, self.config.baud_rate)
            .data_bits(Self::map_data_bits(self.config.data_bits))
            .stop_bits(Self::map_stop_bits(self.config.stop_bits))
            .parity(Self::map_parity(self.config.parity))
            .flow_control(Self::map_flow_control(self.config.flow_control))
            .timeout(Duration::from_millis(self.config.read_timeout_ms))
            .open()
            .map_err(|e| match e.kind {
                serialport::ErrorKind::NoDevice => {
                    TransportError::PortNotFound(self.config.port.clone())
                }
                _ => TransportError::ConnectionFailed(e.to_string()),
            })?;

        self.port = Some(port);
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.port = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotConnected)?;
        port.write_all(data)
            .map_err(|e| TransportError::SendError(e.to_string()))?;
        self.stats.bytes_sent += data.len() as u64;
        Ok(data.len())
    }

    fn receive(&mut self) -> Result<Bytes, TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotConnected)?;
        match port.read(&mut self.read_buf) {
            Ok(0) => Err(TransportError::Disconnected),
            Ok(n) => {
                self.stats.bytes_received += n as u64;
                self.stats.chunks_received += 1;
                Ok(Bytes::copy_from_slice(&self.read_buf[..n]))
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(Bytes::new()),
            Err(e) => {
                self.stats.errors += 1;
                Err(TransportError::IoError(e))
            }
        }
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Serial
    }

    fn connection_info(&self) -> String {
        format!("{}@{}", self.config.port, self.config.baud_rate)
    }

    fn stats(&self) -> TransportStats {
        self.stats
    }
}
