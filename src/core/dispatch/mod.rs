//! Packet dispatchers
//!
//! One dispatcher per framing variant. Each owns a bounded subscriber
//! registry, drives its protocol grammar through a two-phase find/dispatch
//! contract, and fans matched packets out to every subscriber whose filter
//! accepts the packet header. Dispatch never aborts mid-fan-out: per
//! subscriber failures are collected and the last one is returned.

pub mod ascii;
pub mod binary;
pub mod bridge;
pub mod synchronizer;

use std::sync::Arc;

use thiserror::Error;

use crate::core::buffer::ByteBuffer;
use crate::core::packet::PacketDetails;
use crate::core::protocol::Validity;
use crate::core::queue::PacketQueue;

/// Non-fatal dispatch failures.
///
/// Every variant is recoverable by the surrounding session; nothing here
/// stops the receive loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Subscription attempted with a queue its consumer has closed
    #[error("subscriber queue has been closed by its consumer")]
    QueueClosed,
    /// Subscriber registry is at capacity; registration rejected
    #[error("subscriber registry is full")]
    SubscriberCapacityReached,
    /// A subscriber queue had no free slot; packet dropped for it
    #[error("subscriber queue is full, packet dropped")]
    QueueFull,
    /// A subscriber slot is smaller than the packet; delivery dropped
    #[error("packet of {length} bytes exceeds slot capacity {capacity}")]
    QueueOverrun {
        /// Length of the packet that could not be delivered
        length: usize,
        /// Byte capacity of the rejected slot
        capacity: usize,
    },
    /// Structurally matched packet could not be decoded into a measurement
    #[error("packet could not be decoded into a measurement")]
    ParsingFailed,
    /// Measurement sink saturated; newest decode dropped
    #[error("measurement sink is full, frame dropped")]
    SinkFull,
    /// Bridge fragment out of sequence; reassembly reset
    #[error("fragment out of sequence, reassembly reset")]
    UnexpectedFragment,
    /// Reassembly buffer cannot hold the message
    #[error("reassembly buffer exhausted")]
    AssemblyOverflow,
}

/// Outcome of a find pass at one offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FindResult {
    /// Candidate classification
    pub validity: Validity,
    /// Packet length for `Valid`, bytes wanted for `Incomplete`, else 0
    pub length: usize,
}

/// Shared contract of all packet dispatchers.
///
/// `find_packet` recognizes a candidate and caches its metadata;
/// `dispatch_packet` fans the most recently found packet out. The split lets
/// the synchronizer learn the consumed length before paying for fan-out.
pub trait PacketDispatcher: Send {
    /// The sync byte this dispatcher's protocol starts with.
    fn sync_byte(&self) -> u8;

    /// Attempt to recognize a packet starting at `offset`.
    fn find_packet(&mut self, buf: &ByteBuffer, offset: usize) -> FindResult;

    /// Fan out the packet found by the last successful `find_packet`.
    ///
    /// The returned error is the last non-fatal failure encountered; all
    /// subscribers are always attempted.
    fn dispatch_packet(&mut self, buf: &ByteBuffer, offset: usize) -> Result<(), DispatchError>;
}

/// Copy a packet out of the receive buffer into a subscriber queue slot.
///
/// The slot is abandoned (never published) when its capacity is smaller
/// than the packet, so the consumer never observes truncated data.
pub(crate) fn try_push_packet(
    queue: &Arc<PacketQueue>,
    buf: &ByteBuffer,
    offset: usize,
    details: PacketDetails,
) -> Result<(), DispatchError> {
    let length = details.length();
    let Some(mut slot) = queue.reserve() else {
        return Err(DispatchError::QueueFull);
    };
    if slot.capacity() < length {
        return Err(DispatchError::QueueOverrun {
            length,
            capacity: slot.capacity(),
        });
    }
    buf.peek_into(&mut slot.buffer()[..length], offset);
    slot.commit(details);
    Ok(())
}
