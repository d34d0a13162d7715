//! Bridge frame dispatcher
//!
//! Structurally the same find/dispatch/subscribe contract as the other
//! dispatchers, but the packets are fragments of a larger primary binary
//! message. Subscribers choose to see raw fragments, completed reassembled
//! messages, or both. Completed messages are also re-dispatched through the
//! primary dispatcher so its subscribers and the measurement sink see them
//! like any directly-received packet.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::core::buffer::ByteBuffer;
use crate::core::dispatch::binary::BinaryPacketDispatcher;
use crate::core::dispatch::{try_push_packet, DispatchError, FindResult, PacketDispatcher};
use crate::core::packet::PacketDetails;
use crate::core::protocol::bridge::{self, BridgeMetadata, HEADER_LENGTH};
use crate::core::protocol::{binary, crc16, Validity};
use crate::core::queue::PacketQueue;

/// What a bridge subscriber wants to receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeFilter {
    /// Deliver every raw fragment
    pub fragments: bool,
    /// Deliver the reassembled primary packet of each completed message
    pub completed: bool,
}

impl Default for BridgeFilter {
    fn default() -> Self {
        Self {
            fragments: true,
            completed: true,
        }
    }
}

struct Subscriber {
    queue: Arc<PacketQueue>,
    filter: BridgeFilter,
}

/// Dispatcher for the bridge (fragmented) protocol.
pub struct BridgePacketDispatcher {
    subscribers: Vec<Subscriber>,
    subscriber_capacity: usize,
    latest: Option<BridgeMetadata>,
    previous: Option<BridgeMetadata>,
    primary: Arc<Mutex<BinaryPacketDispatcher>>,
    assembly: ByteBuffer,
}

impl BridgePacketDispatcher {
    /// Create a dispatcher reassembling into a buffer of
    /// `assembly_capacity` bytes and re-dispatching through `primary`.
    pub fn new(
        subscriber_capacity: usize,
        primary: Arc<Mutex<BinaryPacketDispatcher>>,
        assembly_capacity: usize,
    ) -> Self {
        let mut dispatcher = Self {
            subscribers: Vec::new(),
            subscriber_capacity,
            latest: None,
            previous: None,
            primary,
            assembly: ByteBuffer::with_capacity(assembly_capacity),
        };
        dispatcher.reset_assembly();
        dispatcher
    }

    /// Register a subscriber with a fragment/completed filter.
    pub fn add_subscriber(
        &mut self,
        queue: Arc<PacketQueue>,
        filter: BridgeFilter,
    ) -> Result<(), DispatchError> {
        if queue.is_closed() {
            return Err(DispatchError::QueueClosed);
        }
        if self.subscribers.len() >= self.subscriber_capacity {
            return Err(DispatchError::SubscriberCapacityReached);
        }
        self.subscribers.push(Subscriber { queue, filter });
        Ok(())
    }

    /// Remove every registration of `queue`.
    pub fn remove_subscriber(&mut self, queue: &Arc<PacketQueue>) {
        self.subscribers.retain(|s| !Arc::ptr_eq(&s.queue, queue));
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn reset_assembly(&mut self) {
        self.assembly.clear();
        // Reassembled messages are primary frames; restore their sync byte
        let _ = self.assembly.put(&[binary::SYNC]);
    }

    /// Append this fragment's payload to the reassembly buffer.
    fn absorb_payload(
        &mut self,
        buf: &ByteBuffer,
        offset: usize,
        payload_len: usize,
    ) -> Result<(), DispatchError> {
        let mut payload = vec![0u8; payload_len];
        if !buf.peek_into(&mut payload, offset + HEADER_LENGTH) {
            return Err(DispatchError::AssemblyOverflow);
        }
        if self.assembly.put(&payload).is_err() {
            self.reset_assembly();
            self.previous = None;
            return Err(DispatchError::AssemblyOverflow);
        }
        Ok(())
    }

    /// Stamp the primary-frame CRC over the reassembled body.
    fn seal_assembly(&mut self) {
        let mut body = vec![0u8; self.assembly.len() - 1];
        self.assembly.peek_into(&mut body, 1);
        let crc = crc16(&body);
        let _ = self.assembly.put(&crc.to_be_bytes());
    }

    fn fragment_out_of_sequence(&self, metadata: &BridgeMetadata) -> bool {
        if metadata.header.fragment_index == 1 {
            return false;
        }
        match &self.previous {
            None => true,
            Some(prev) => {
                metadata.header.message_id != prev.header.message_id
                    || u16::from(metadata.header.fragment_index)
                        != u16::from(prev.header.fragment_index) + 1
            }
        }
    }
}

impl PacketDispatcher for BridgePacketDispatcher {
    fn sync_byte(&self) -> u8 {
        bridge::SYNC
    }

    fn find_packet(&mut self, buf: &ByteBuffer, offset: usize) -> FindResult {
        let found = bridge::find_packet(buf, offset);
        if found.validity == Validity::Valid {
            self.latest = found.metadata;
        }
        FindResult {
            validity: found.validity,
            length: found.length,
        }
    }

    fn dispatch_packet(&mut self, buf: &ByteBuffer, offset: usize) -> Result<(), DispatchError> {
        let Some(metadata) = self.latest else {
            return Ok(());
        };

        // Raw fragment fan-out happens regardless of reassembly state
        let mut last = None;
        for subscriber in &self.subscribers {
            if !subscriber.filter.fragments {
                continue;
            }
            if let Err(error) = try_push_packet(
                &subscriber.queue,
                buf,
                offset,
                PacketDetails::Bridge(metadata),
            ) {
                last = Some(error);
            }
        }

        if self.fragment_out_of_sequence(&metadata) {
            trace!(
                message_id = metadata.header.message_id,
                index = metadata.header.fragment_index,
                "Fragment out of sequence"
            );
            self.reset_assembly();
            self.previous = None;
            return Err(DispatchError::UnexpectedFragment);
        }

        if metadata.header.fragment_index == 1 {
            self.reset_assembly();
        }
        self.absorb_payload(buf, offset, metadata.header.payload_len as usize)?;

        if metadata.header.fragment_index == metadata.header.fragment_count {
            self.seal_assembly();

            let found = binary::find_packet(&self.assembly, 0);
            if found.validity == Validity::Valid {
                let completed = found.metadata.expect("valid find carries metadata");
                for subscriber in &self.subscribers {
                    if !subscriber.filter.completed {
                        continue;
                    }
                    if let Err(error) = try_push_packet(
                        &subscriber.queue,
                        &self.assembly,
                        0,
                        PacketDetails::Binary(completed),
                    ) {
                        last = Some(error);
                    }
                }

                let mut primary = self.primary.lock();
                let result = primary.find_packet(&self.assembly, 0);
                if result.validity == Validity::Valid {
                    if let Err(error) = primary.dispatch_packet(&self.assembly, 0) {
                        last = Some(error);
                    }
                }
            } else {
                // Fragments reassembled into something the primary grammar
                // rejects; nothing downstream can use it
                last = Some(DispatchError::ParsingFailed);
            }
            self.reset_assembly();
        }
        self.previous = Some(metadata);

        match last {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
