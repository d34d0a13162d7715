//! ASCII sentence dispatcher
//!
//! Routes framed sentences three ways: vendor measurement sentences fan out
//! to subscribers and decode into the measurement sink, other vendor
//! sentences are command responses and go to the command processor, and
//! non-vendor sentences always fan out as pass-through text.

use std::sync::Arc;

use tracing::trace;

use crate::core::buffer::ByteBuffer;
use crate::core::command::CommandProcessor;
use crate::core::dispatch::{try_push_packet, DispatchError, FindResult, PacketDispatcher};
use crate::core::measurement::MeasurementSink;
use crate::core::packet::PacketDetails;
use crate::core::protocol::ascii::{
    self, AsciiMetadata, MeasurementHeader, VENDOR_PREFIX,
};
use crate::core::protocol::Validity;
use crate::core::queue::PacketQueue;

/// Subscriber filter kinds for sentence headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsciiFilter {
    /// Deliver sentences whose header has the configured prefix
    StartsWith,
    /// Deliver sentences whose header lacks the configured prefix
    DoesNotStartWith,
}

struct Subscriber {
    queue: Arc<PacketQueue>,
    prefix: String,
    filter: AsciiFilter,
}

/// Dispatcher for the ASCII sentence protocol.
pub struct AsciiPacketDispatcher {
    subscribers: Vec<Subscriber>,
    subscriber_capacity: usize,
    latest: Option<AsciiMetadata>,
    sink: Arc<MeasurementSink>,
    commands: Arc<CommandProcessor>,
    decode_enabled: bool,
}

impl AsciiPacketDispatcher {
    /// Create a dispatcher feeding the given sink and command processor.
    pub fn new(
        subscriber_capacity: usize,
        sink: Arc<MeasurementSink>,
        commands: Arc<CommandProcessor>,
    ) -> Self {
        Self {
            subscribers: Vec::new(),
            subscriber_capacity,
            latest: None,
            sink,
            commands,
            decode_enabled: true,
        }
    }

    /// Enable or disable decoding measurement sentences into the sink.
    pub fn set_decode_enabled(&mut self, enabled: bool) {
        self.decode_enabled = enabled;
    }

    /// Register a subscriber with a header-prefix filter.
    ///
    /// An empty prefix is normalized to `StartsWith`, which matches every
    /// sentence.
    pub fn add_subscriber(
        &mut self,
        queue: Arc<PacketQueue>,
        prefix: &str,
        filter: AsciiFilter,
    ) -> Result<(), DispatchError> {
        if queue.is_closed() {
            return Err(DispatchError::QueueClosed);
        }
        let filter = if prefix.is_empty() {
            AsciiFilter::StartsWith
        } else {
            filter
        };
        if self.subscribers.len() >= self.subscriber_capacity {
            return Err(DispatchError::SubscriberCapacityReached);
        }
        self.subscribers.push(Subscriber {
            queue,
            prefix: prefix.to_string(),
            filter,
        });
        Ok(())
    }

    /// Remove every registration of `queue`.
    pub fn remove_subscriber(&mut self, queue: &Arc<PacketQueue>) {
        self.subscribers.retain(|s| !Arc::ptr_eq(&s.queue, queue));
    }

    /// Remove registrations of `queue` with exactly this filter prefix.
    pub fn remove_subscriber_with_filter(&mut self, queue: &Arc<PacketQueue>, prefix: &str) {
        self.subscribers
            .retain(|s| !(Arc::ptr_eq(&s.queue, queue) && s.prefix == prefix));
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn invoke_subscribers(
        &self,
        buf: &ByteBuffer,
        offset: usize,
        metadata: &AsciiMetadata,
    ) -> Option<DispatchError> {
        let mut last = None;
        for subscriber in &self.subscribers {
            let has_prefix = metadata.header.starts_with(&subscriber.prefix);
            let deliver = match subscriber.filter {
                AsciiFilter::StartsWith => has_prefix,
                AsciiFilter::DoesNotStartWith => !has_prefix,
            };
            if !deliver {
                continue;
            }
            if let Err(error) = try_push_packet(
                &subscriber.queue,
                buf,
                offset,
                PacketDetails::Ascii(metadata.clone()),
            ) {
                last = Some(error);
            }
        }
        last
    }

    fn try_push_to_sink(
        &self,
        buf: &ByteBuffer,
        offset: usize,
        metadata: &AsciiMetadata,
        header: MeasurementHeader,
    ) -> Option<DispatchError> {
        match ascii::parse_packet(buf, offset, metadata, header) {
            None => Some(DispatchError::ParsingFailed),
            Some(frame) => match self.sink.try_push(frame) {
                Ok(()) => None,
                Err(_) => Some(DispatchError::SinkFull),
            },
        }
    }
}

impl PacketDispatcher for AsciiPacketDispatcher {
    fn sync_byte(&self) -> u8 {
        ascii::SYNC
    }

    fn find_packet(&mut self, buf: &ByteBuffer, offset: usize) -> FindResult {
        let found = ascii::find_packet(buf, offset);
        if found.validity == Validity::Valid {
            self.latest = found.metadata;
        }
        FindResult {
            validity: found.validity,
            length: found.length,
        }
    }

    fn dispatch_packet(&mut self, buf: &ByteBuffer, offset: usize) -> Result<(), DispatchError> {
        let Some(metadata) = self.latest.clone() else {
            return Ok(());
        };

        let mut last = None;
        if metadata.header.starts_with(VENDOR_PREFIX) {
            if let Some(header) = MeasurementHeader::from_header(&metadata.header) {
                last = self.invoke_subscribers(buf, offset, &metadata);
                if self.sink.is_enabled() && self.decode_enabled {
                    if let Some(error) = self.try_push_to_sink(buf, offset, &metadata, header) {
                        last = Some(error);
                    }
                }
            } else {
                // Command or error response, not subscriber traffic
                trace!(header = %metadata.header, "Passing command response");
                let mut sentence = vec![0u8; metadata.length];
                if buf.peek_into(&mut sentence, offset) {
                    if let Ok(text) = std::str::from_utf8(&sentence) {
                        self.commands.match_response(text);
                    }
                }
            }
        } else {
            // Foreign sentence: always pass through to subscribers
            last = self.invoke_subscribers(buf, offset, &metadata);
        }

        match last {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fixture() -> (AsciiPacketDispatcher, Arc<MeasurementSink>, Arc<CommandProcessor>) {
        let sink = Arc::new(MeasurementSink::new(4));
        let commands = Arc::new(CommandProcessor::new(Duration::from_secs(5)));
        let dispatcher = AsciiPacketDispatcher::new(4, Arc::clone(&sink), Arc::clone(&commands));
        (dispatcher, sink, commands)
    }

    fn buffer_with(sentence: &str) -> ByteBuffer {
        let mut buf = ByteBuffer::with_capacity(1024);
        buf.put(sentence.as_bytes()).unwrap();
        buf
    }

    fn ymr_sentence() -> String {
        ascii::frame_sentence(
            "YMR,+010.5,-002.1,+000.3,+1.09,-0.25,+3.01,-00.01,-00.02,-09.80,-0.001,+0.002,-0.001",
        )
    }

    fn find_and_dispatch(
        dispatcher: &mut AsciiPacketDispatcher,
        buf: &ByteBuffer,
    ) -> Result<(), DispatchError> {
        let found = dispatcher.find_packet(buf, 0);
        assert_eq!(found.validity, Validity::Valid);
        dispatcher.dispatch_packet(buf, 0)
    }

    #[test]
    fn test_measurement_fans_out_and_decodes() {
        let (mut dispatcher, sink, _) = fixture();
        let queue = PacketQueue::new(4, 512);
        dispatcher
            .add_subscriber(Arc::clone(&queue), "NL", AsciiFilter::StartsWith)
            .unwrap();

        let buf = buffer_with(&ymr_sentence());
        find_and_dispatch(&mut dispatcher, &buf).unwrap();

        let packet = queue.pop().unwrap();
        assert_eq!(packet.bytes(), ymr_sentence().as_bytes());
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_filter_kinds_select_disjoint_subscribers() {
        let (mut dispatcher, _, _) = fixture();
        let vendor = PacketQueue::new(4, 512);
        let foreign = PacketQueue::new(4, 512);
        dispatcher
            .add_subscriber(Arc::clone(&vendor), "NL", AsciiFilter::StartsWith)
            .unwrap();
        dispatcher
            .add_subscriber(Arc::clone(&foreign), "NL", AsciiFilter::DoesNotStartWith)
            .unwrap();

        let buf = buffer_with(&ymr_sentence());
        find_and_dispatch(&mut dispatcher, &buf).unwrap();

        assert_eq!(vendor.len(), 1);
        assert_eq!(foreign.len(), 0);
    }

    #[test]
    fn test_empty_prefix_matches_everything() {
        let (mut dispatcher, _, _) = fixture();
        let queue = PacketQueue::new(4, 512);
        // DoesNotStartWith with an empty prefix is normalized to match-all
        dispatcher
            .add_subscriber(Arc::clone(&queue), "", AsciiFilter::DoesNotStartWith)
            .unwrap();

        let buf = buffer_with(&ymr_sentence());
        find_and_dispatch(&mut dispatcher, &buf).unwrap();
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_command_response_bypasses_subscribers() {
        let (mut dispatcher, sink, commands) = fixture();
        let queue = PacketQueue::new(4, 512);
        dispatcher
            .add_subscriber(Arc::clone(&queue), "", AsciiFilter::StartsWith)
            .unwrap();
        let rx = commands.register("WRG,06,115200");

        let response = ascii::frame_sentence("WRG,06,115200");
        let buf = buffer_with(&response);
        find_and_dispatch(&mut dispatcher, &buf).unwrap();

        assert!(queue.is_empty());
        assert!(sink.is_empty());
        assert!(rx.try_recv().is_ok());
    }

    #[test]
    fn test_foreign_sentence_passes_through() {
        let (mut dispatcher, sink, _) = fixture();
        let queue = PacketQueue::new(4, 512);
        dispatcher
            .add_subscriber(Arc::clone(&queue), "", AsciiFilter::StartsWith)
            .unwrap();

        let body = "GPGGA,123519,4807.038,N";
        let cs = crate::core::protocol::xor_checksum(body.as_bytes());
        let buf = buffer_with(&format!("${body}*{cs:02X}\r\n"));
        find_and_dispatch(&mut dispatcher, &buf).unwrap();

        assert_eq!(queue.len(), 1);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_full_queue_does_not_block_others() {
        let (mut dispatcher, sink, _) = fixture();
        let full = PacketQueue::new(0, 512);
        let open = PacketQueue::new(4, 512);
        dispatcher
            .add_subscriber(Arc::clone(&full), "", AsciiFilter::StartsWith)
            .unwrap();
        dispatcher
            .add_subscriber(Arc::clone(&open), "", AsciiFilter::StartsWith)
            .unwrap();

        let buf = buffer_with(&ymr_sentence());
        let result = find_and_dispatch(&mut dispatcher, &buf);

        // The failure is reported, the other subscriber and the sink are not affected
        assert_eq!(result, Err(DispatchError::QueueFull));
        assert_eq!(open.len(), 1);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_overrun_reports_and_continues() {
        let (mut dispatcher, _, _) = fixture();
        let small = PacketQueue::new(4, 8);
        let open = PacketQueue::new(4, 512);
        dispatcher
            .add_subscriber(Arc::clone(&small), "", AsciiFilter::StartsWith)
            .unwrap();
        dispatcher
            .add_subscriber(Arc::clone(&open), "", AsciiFilter::StartsWith)
            .unwrap();

        let buf = buffer_with(&ymr_sentence());
        let result = find_and_dispatch(&mut dispatcher, &buf);

        assert!(matches!(result, Err(DispatchError::QueueOverrun { .. })));
        assert!(small.is_empty());
        assert_eq!(open.len(), 1);
    }

    #[test]
    fn test_registry_capacity() {
        let (mut dispatcher, _, _) = fixture();
        for _ in 0..4 {
            let queue = PacketQueue::new(1, 64);
            dispatcher
                .add_subscriber(queue, "NL", AsciiFilter::StartsWith)
                .unwrap();
        }
        let overflow = PacketQueue::new(1, 64);
        assert_eq!(
            dispatcher.add_subscriber(overflow, "NL", AsciiFilter::StartsWith),
            Err(DispatchError::SubscriberCapacityReached)
        );
    }

    #[test]
    fn test_add_remove_round_trip() {
        let (mut dispatcher, _, _) = fixture();
        let queue = PacketQueue::new(1, 64);
        let before = dispatcher.subscriber_count();

        dispatcher
            .add_subscriber(Arc::clone(&queue), "NLY", AsciiFilter::StartsWith)
            .unwrap();
        dispatcher.remove_subscriber(&queue);

        assert_eq!(dispatcher.subscriber_count(), before);
    }

    #[test]
    fn test_closed_queue_rejected_at_registration() {
        let (mut dispatcher, _, _) = fixture();
        let queue = PacketQueue::new(1, 64);
        queue.close();

        assert_eq!(
            dispatcher.add_subscriber(queue, "", AsciiFilter::StartsWith),
            Err(DispatchError::QueueClosed)
        );
    }

    #[test]
    fn test_decode_disabled_skips_sink() {
        let (mut dispatcher, sink, _) = fixture();
        dispatcher.set_decode_enabled(false);

        let buf = buffer_with(&ymr_sentence());
        find_and_dispatch(&mut dispatcher, &buf).unwrap();
        assert!(sink.is_empty());
    }
}
