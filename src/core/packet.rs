//! Captured packet values
//!
//! A `Packet` is one framed packet lifted out of the receive stream: owned
//! byte storage plus typed metadata describing which framing protocol
//! matched it. Packets are move-only; they are created per detected packet,
//! handed to at most one subscriber queue slot, and dropped when consumed.

use std::time::Instant;

use crate::core::protocol::ascii::AsciiMetadata;
use crate::core::protocol::binary::BinaryMetadata;
use crate::core::protocol::bridge::BridgeMetadata;

/// Protocol-tagged packet metadata.
///
/// The active variant decides which metadata fields are meaningful. `None`
/// tags bytes that matched no protocol (the skipped-byte stream).
#[derive(Debug, Clone)]
pub enum PacketDetails {
    /// Unrecognized bytes passed to a skipped-byte observer
    None {
        /// Number of captured bytes
        length: usize,
        /// Capture time
        timestamp: Instant,
        /// First captured byte, for quick classification
        first_byte: u8,
    },
    /// ASCII sentence
    Ascii(AsciiMetadata),
    /// Primary binary frame
    Binary(BinaryMetadata),
    /// Bridge fragment frame
    Bridge(BridgeMetadata),
}

impl PacketDetails {
    /// Packet length in bytes.
    pub fn length(&self) -> usize {
        match self {
            Self::None { length, .. } => *length,
            Self::Ascii(m) => m.length,
            Self::Binary(m) => m.length,
            Self::Bridge(m) => m.length,
        }
    }

    /// Capture time.
    pub fn timestamp(&self) -> Instant {
        match self {
            Self::None { timestamp, .. } => *timestamp,
            Self::Ascii(m) => m.timestamp,
            Self::Binary(m) => m.timestamp,
            Self::Bridge(m) => m.timestamp,
        }
    }

    /// The protocol sync byte, or `None` for unrecognized bytes.
    pub fn sync_byte(&self) -> Option<u8> {
        match self {
            Self::None { .. } => None,
            Self::Ascii(_) => Some(crate::core::protocol::ascii::SYNC),
            Self::Binary(_) => Some(crate::core::protocol::binary::SYNC),
            Self::Bridge(_) => Some(crate::core::protocol::bridge::SYNC),
        }
    }
}

/// One captured packet: owned storage plus protocol metadata.
///
/// Move-only by construction; there is deliberately no `Clone`, so a large
/// capture is never duplicated by accident.
pub struct Packet {
    storage: Box<[u8]>,
    details: PacketDetails,
}

impl Packet {
    /// Build a packet from storage and metadata.
    ///
    /// The metadata length must not exceed the storage capacity.
    pub fn from_parts(storage: Box<[u8]>, details: PacketDetails) -> Self {
        debug_assert!(details.length() <= storage.len());
        Self { storage, details }
    }

    /// Storage capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.storage.len()
    }

    /// Packet length in bytes.
    pub fn len(&self) -> usize {
        self.details.length().min(self.storage.len())
    }

    /// Check if the packet carries no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Protocol metadata.
    pub fn details(&self) -> &PacketDetails {
        &self.details
    }

    /// Capture time.
    pub fn timestamp(&self) -> Instant {
        self.details.timestamp()
    }

    /// The packet bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.storage[..self.len()]
    }

    /// Packet bytes as a hex string.
    pub fn hex(&self) -> String {
        hex::encode(self.bytes())
    }
}

impl std::fmt::Debug for Packet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Packet")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .field("details", &self.details)
            .finish()
    }
}
