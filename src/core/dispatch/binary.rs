//! Primary binary frame dispatcher
//!
//! Fans framed binary packets out by header-bitmask filters and decodes
//! them into the measurement sink when the packet's groups intersect the
//! dispatcher's decode-interest mask. Fan-out and decode are independent
//! failure domains: a decode failure never withholds raw packets from
//! subscribers.

use std::sync::Arc;

use crate::core::buffer::ByteBuffer;
use crate::core::dispatch::{try_push_packet, DispatchError, FindResult, PacketDispatcher};
use crate::core::measurement::{MeasurementGroups, MeasurementSink};
use crate::core::packet::PacketDetails;
use crate::core::protocol::binary::{self, BinaryMetadata};
use crate::core::protocol::Validity;
use crate::core::queue::PacketQueue;

/// Subscriber filter kinds for binary header bitmasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFilter {
    /// Deliver packets whose header equals the filter mask exactly
    ExactMatch,
    /// Deliver packets whose header intersects the filter mask
    AnyMatch,
    /// Deliver packets whose header differs from the filter mask
    NotExactMatch,
}

struct Subscriber {
    queue: Arc<PacketQueue>,
    groups: MeasurementGroups,
    filter: BinaryFilter,
}

/// Dispatcher for the primary binary protocol.
pub struct BinaryPacketDispatcher {
    subscribers: Vec<Subscriber>,
    subscriber_capacity: usize,
    latest: Option<BinaryMetadata>,
    sink: Arc<MeasurementSink>,
    interest: MeasurementGroups,
    decode_enabled: bool,
}

impl BinaryPacketDispatcher {
    /// Create a dispatcher feeding the given sink.
    pub fn new(subscriber_capacity: usize, sink: Arc<MeasurementSink>) -> Self {
        Self {
            subscribers: Vec::new(),
            subscriber_capacity,
            latest: None,
            sink,
            interest: MeasurementGroups::all(),
            decode_enabled: true,
        }
    }

    /// Set which measurement groups are decoded into the sink.
    ///
    /// Packets whose header does not intersect this mask are fanned out but
    /// never decoded, so no work is spent on fields nobody asked for.
    pub fn set_decode_interest(&mut self, interest: MeasurementGroups) {
        self.interest = interest;
    }

    /// Enable or disable decoding into the sink.
    pub fn set_decode_enabled(&mut self, enabled: bool) {
        self.decode_enabled = enabled;
    }

    /// Register a subscriber with a bitmask filter.
    ///
    /// An all-zero mask is normalized to every bit set with `AnyMatch`,
    /// which matches any non-empty packet.
    pub fn add_subscriber(
        &mut self,
        queue: Arc<PacketQueue>,
        groups: MeasurementGroups,
        filter: BinaryFilter,
    ) -> Result<(), DispatchError> {
        if queue.is_closed() {
            return Err(DispatchError::QueueClosed);
        }
        let (groups, filter) = if groups.is_empty() {
            (MeasurementGroups::all(), BinaryFilter::AnyMatch)
        } else {
            (groups, filter)
        };
        if self.subscribers.len() >= self.subscriber_capacity {
            return Err(DispatchError::SubscriberCapacityReached);
        }
        self.subscribers.push(Subscriber {
            queue,
            groups,
            filter,
        });
        Ok(())
    }

    /// Remove every registration of `queue`.
    pub fn remove_subscriber(&mut self, queue: &Arc<PacketQueue>) {
        self.subscribers.retain(|s| !Arc::ptr_eq(&s.queue, queue));
    }

    /// Remove registrations of `queue` with exactly this filter mask.
    pub fn remove_subscriber_with_filter(
        &mut self,
        queue: &Arc<PacketQueue>,
        groups: &MeasurementGroups,
    ) {
        self.subscribers
            .retain(|s| !(Arc::ptr_eq(&s.queue, queue) && s.groups == *groups));
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn invoke_subscribers(
        &self,
        buf: &ByteBuffer,
        offset: usize,
        metadata: &BinaryMetadata,
        packet_groups: &MeasurementGroups,
    ) -> Option<DispatchError> {
        let mut last = None;
        for subscriber in &self.subscribers {
            let deliver = match subscriber.filter {
                BinaryFilter::AnyMatch => subscriber.groups.intersects(packet_groups),
                BinaryFilter::ExactMatch => subscriber.groups == *packet_groups,
                BinaryFilter::NotExactMatch => subscriber.groups != *packet_groups,
            };
            if !deliver {
                continue;
            }
            if let Err(error) = try_push_packet(
                &subscriber.queue,
                buf,
                offset,
                PacketDetails::Binary(*metadata),
            ) {
                last = Some(error);
            }
        }
        last
    }
}

impl PacketDispatcher for BinaryPacketDispatcher {
    fn sync_byte(&self) -> u8 {
        binary::SYNC
    }

    fn find_packet(&mut self, buf: &ByteBuffer, offset: usize) -> FindResult {
        let found = binary::find_packet(buf, offset);
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
        let packet_groups = metadata.header.measurement_groups();

        let mut last = self.invoke_subscribers(buf, offset, &metadata, &packet_groups);

        if self.sink.is_enabled() && self.decode_enabled && packet_groups.intersects(&self.interest)
        {
            match binary::parse_packet(buf, offset, &metadata) {
                None => last = Some(DispatchError::ParsingFailed),
                Some(frame) => {
                    if self.sink.try_push(frame).is_err() {
                        last = Some(DispatchError::SinkFull);
                    }
                }
            }
        }

        match last {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
