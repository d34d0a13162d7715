//! # NavLink
//!
//! A communication SDK for inertial measurement sensors that stream data
//! over a serial port or a recorded byte log. The core is a packet framing
//! and dispatch engine: it scans the raw byte stream under three
//! concurrently-active framing protocols (ASCII sentences, primary binary
//! frames, fragmented bridge frames), validates each candidate, fans
//! matched packets out to filtered subscriber queues, and feeds a shared
//! queue of decoded measurements.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use navlink::{SdkConfig, Sensor, SerialConfig, SerialTransport};
//!
//! fn main() -> anyhow::Result<()> {
//!     let transport = SerialTransport::new(SerialConfig::new("/dev/ttyUSB0", 115200));
//!     let mut sensor = Sensor::new(Box::new(transport), &SdkConfig::default());
//!     sensor.connect()?;
//!
//!     while let Some(frame) = sensor.wait_for_measurement(Duration::from_secs(1)) {
//!         if let Some([yaw, pitch, roll]) = frame.attitude.ypr {
//!             println!("ypr: {yaw:.1} {pitch:.1} {roll:.1}");
//!         }
//!     }
//!
//!     sensor.disconnect()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::config::{ConfigError, SdkConfig};
pub use crate::core::buffer::ByteBuffer;
pub use crate::core::command::{CommandProcessor, CommandResponse};
pub use crate::core::dispatch::ascii::{AsciiFilter, AsciiPacketDispatcher};
pub use crate::core::dispatch::binary::{BinaryFilter, BinaryPacketDispatcher};
pub use crate::core::dispatch::bridge::{BridgeFilter, BridgePacketDispatcher};
pub use crate::core::dispatch::synchronizer::PacketSynchronizer;
pub use crate::core::dispatch::{DispatchError, FindResult, PacketDispatcher};
pub use crate::core::export::{Exporter, PacketWriter, QueueMode};
pub use crate::core::measurement::{
    MeasurementFrame, MeasurementGroup, MeasurementGroups, MeasurementSink,
};
pub use crate::core::packet::{Packet, PacketDetails};
pub use crate::core::protocol::Validity;
pub use crate::core::queue::{PacketQueue, SlotWriter};
pub use crate::core::sensor::{CommandError, Sensor, SensorStats};
pub use crate::core::transport::{
    ReplayConfig, ReplayTransport, SerialConfig, SerialFlowControl, SerialParity, SerialTransport,
    Transport, TransportError, TransportStats, TransportType,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
