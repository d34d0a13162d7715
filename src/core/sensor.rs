//! Sensor session
//!
//! Owns the transport, the receive buffer, the three dispatchers, and the
//! synchronizer, and drives them from one dedicated receive thread. The
//! application subscribes queues, reads decoded measurements from the
//! shared sink, and sends commands; everything stream-facing happens on the
//! receive thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::SdkConfig;
use crate::core::command::{CommandProcessor, CommandResponse};
use crate::core::dispatch::ascii::{AsciiFilter, AsciiPacketDispatcher};
use crate::core::dispatch::binary::{BinaryFilter, BinaryPacketDispatcher};
use crate::core::dispatch::bridge::{BridgeFilter, BridgePacketDispatcher};
use crate::core::dispatch::synchronizer::PacketSynchronizer;
use crate::core::dispatch::{DispatchError, PacketDispatcher};
use crate::core::measurement::{MeasurementFrame, MeasurementGroups, MeasurementSink};
use crate::core::protocol::{ascii, binary, bridge};
use crate::core::queue::PacketQueue;
use crate::core::transport::{Transport, TransportError, TransportStats};

/// Errors from the blocking command API.
#[derive(Debug, Error)]
pub enum CommandError {
    /// No response arrived within the timeout
    #[error("timed out waiting for a response")]
    Timeout,
    /// The command could not be written to the transport
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Session counters, sampled at call time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SensorStats {
    /// Valid ASCII sentences dispatched
    pub ascii_packets: u64,
    /// Valid primary binary frames dispatched
    pub binary_packets: u64,
    /// Valid bridge fragments dispatched
    pub bridge_packets: u64,
    /// Bytes no protocol claimed
    pub skipped_bytes: u64,
    /// Bytes consumed from the stream
    pub received_bytes: u64,
    /// Transport-level statistics
    pub transport: TransportStats,
}

/// One device session: transport, dispatch pipeline, and receive thread.
pub struct Sensor {
    transport: Arc<Mutex<Box<dyn Transport>>>,
    synchronizer: Arc<Mutex<PacketSynchronizer>>,
    ascii: Arc<Mutex<AsciiPacketDispatcher>>,
    binary: Arc<Mutex<BinaryPacketDispatcher>>,
    bridge: Arc<Mutex<BridgePacketDispatcher>>,
    sink: Arc<MeasurementSink>,
    commands: Arc<CommandProcessor>,
    listening: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>,
}

impl Sensor {
    /// Build a session over `transport` with the given configuration.
    ///
    /// Dispatcher priority order is ASCII, primary binary, bridge.
    pub fn new(transport: Box<dyn Transport>, config: &SdkConfig) -> Self {
        let sink = Arc::new(MeasurementSink::new(config.measurement_queue_capacity));
        let commands = Arc::new(CommandProcessor::new(Duration::from_secs(
            config.command_stale_secs,
        )));

        let ascii_dispatcher = Arc::new(Mutex::new(AsciiPacketDispatcher::new(
            config.subscriber_capacity,
            Arc::clone(&sink),
            Arc::clone(&commands),
        )));
        let binary_dispatcher = Arc::new(Mutex::new(BinaryPacketDispatcher::new(
            config.subscriber_capacity,
            Arc::clone(&sink),
        )));
        let bridge_dispatcher = Arc::new(Mutex::new(BridgePacketDispatcher::new(
            config.subscriber_capacity,
            Arc::clone(&binary_dispatcher),
            config.assembly_capacity,
        )));

        let mut synchronizer =
            PacketSynchronizer::new(config.rx_buffer_capacity, config.packet_max_length);
        synchronizer
            .add_dispatcher(Arc::clone(&ascii_dispatcher) as Arc<Mutex<dyn PacketDispatcher>>);
        synchronizer
            .add_dispatcher(Arc::clone(&binary_dispatcher) as Arc<Mutex<dyn PacketDispatcher>>);
        synchronizer
            .add_dispatcher(Arc::clone(&bridge_dispatcher) as Arc<Mutex<dyn PacketDispatcher>>);

        Self {
            transport: Arc::new(Mutex::new(transport)),
            synchronizer: Arc::new(Mutex::new(synchronizer)),
            ascii: ascii_dispatcher,
            binary: binary_dispatcher,
            bridge: bridge_dispatcher,
            sink,
            commands,
            listening: Arc::new(AtomicBool::new(false)),
            listener: None,
        }
    }

    /// Open the transport and start the receive thread.
    pub fn connect(&mut self) -> Result<(), TransportError> {
        {
            let mut transport = self.transport.lock();
            transport.connect()?;
            info!(info = %transport.connection_info(), "Sensor connected");
        }
        self.start_listening();
        Ok(())
    }

    /// Stop the receive thread and close the transport.
    pub fn disconnect(&mut self) -> Result<(), TransportError> {
        self.stop_listening();
        self.transport.lock().disconnect()?;
        info!("Sensor disconnected");
        Ok(())
    }

    /// Whether the receive thread is running.
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    /// Block until the receive thread exits (e.g. replay exhausted).
    pub fn join(&mut self) {
        if let Some(listener) = self.listener.take() {
            let _ = listener.join();
        }
    }

    fn start_listening(&mut self) {
        if self.listening.swap(true, Ordering::AcqRel) {
            return;
        }
        let transport = Arc::clone(&self.transport);
        let synchronizer = Arc::clone(&self.synchronizer);
        let listening = Arc::clone(&self.listening);

        self.listener = Some(std::thread::spawn(move || {
            while listening.load(Ordering::Acquire) {
                let received = transport.lock().receive();
                match received {
                    Ok(chunk) if !chunk.is_empty() => {
                        let mut sync = synchronizer.lock();
                        if sync.feed(&chunk).is_err() {
                            // Drain what we can, then retry the chunk once
                            while !sync.dispatch_next_packet() {}
                            if sync.feed(&chunk).is_err() {
                                warn!(len = chunk.len(), "Receive buffer overflow, chunk dropped");
                            }
                        }
                        while !sync.dispatch_next_packet() {}
                    }
                    Ok(_) => {
                        // Nothing arrived within the transport's timeout
                        std::thread::sleep(Duration::from_millis(1));
                    }
                    Err(TransportError::Disconnected) => {
                        debug!("Transport stream ended");
                        let mut sync = synchronizer.lock();
                        while !sync.dispatch_next_packet() {}
                        listening.store(false, Ordering::Release);
                    }
                    Err(error) => {
                        warn!(%error, "Transport receive failed");
                        std::thread::sleep(Duration::from_millis(10));
                    }
                }
            }
        }));
    }

    fn stop_listening(&mut self) {
        self.listening.store(false, Ordering::Release);
        self.join();
    }

    // ------------------------------------------
    // Subscriptions
    // ------------------------------------------

    /// Subscribe a queue to ASCII sentences with a header-prefix filter.
    pub fn subscribe_ascii(
        &self,
        queue: Arc<PacketQueue>,
        prefix: &str,
        filter: AsciiFilter,
    ) -> Result<(), DispatchError> {
        self.ascii.lock().add_subscriber(queue, prefix, filter)
    }

    /// Subscribe a queue to primary binary frames with a bitmask filter.
    pub fn subscribe_binary(
        &self,
        queue: Arc<PacketQueue>,
        groups: MeasurementGroups,
        filter: BinaryFilter,
    ) -> Result<(), DispatchError> {
        self.binary.lock().add_subscriber(queue, groups, filter)
    }

    /// Subscribe a queue to bridge fragments and/or completed messages.
    pub fn subscribe_bridge(
        &self,
        queue: Arc<PacketQueue>,
        filter: BridgeFilter,
    ) -> Result<(), DispatchError> {
        self.bridge.lock().add_subscriber(queue, filter)
    }

    /// Remove a queue from every dispatcher it is subscribed to.
    pub fn unsubscribe(&self, queue: &Arc<PacketQueue>) {
        self.ascii.lock().remove_subscriber(queue);
        self.binary.lock().remove_subscriber(queue);
        self.bridge.lock().remove_subscriber(queue);
    }

    /// Remove only the ASCII registrations of `queue` with this exact prefix.
    pub fn unsubscribe_ascii(&self, queue: &Arc<PacketQueue>, prefix: &str) {
        self.ascii.lock().remove_subscriber_with_filter(queue, prefix);
    }

    /// Remove only the binary registrations of `queue` with this exact mask.
    pub fn unsubscribe_binary(&self, queue: &Arc<PacketQueue>, groups: &MeasurementGroups) {
        self.binary.lock().remove_subscriber_with_filter(queue, groups);
    }

    /// Register a queue receiving copies of skipped bytes.
    pub fn register_skipped_byte_queue(
        &self,
        queue: Arc<PacketQueue>,
    ) -> Result<(), DispatchError> {
        self.synchronizer.lock().register_skipped_byte_queue(queue)
    }

    /// Stop copying skipped bytes.
    pub fn deregister_skipped_byte_queue(&self) {
        self.synchronizer.lock().deregister_skipped_byte_queue()
    }

    /// Set which measurement groups are decoded into the sink.
    pub fn set_decode_interest(&self, interest: MeasurementGroups) {
        self.binary.lock().set_decode_interest(interest);
    }

    // ------------------------------------------
    // Measurements
    // ------------------------------------------

    /// Pop the oldest decoded measurement, if any.
    pub fn next_measurement(&self) -> Option<MeasurementFrame> {
        self.sink.pop()
    }

    /// Pop the newest decoded measurement, discarding older ones.
    pub fn most_recent_measurement(&self) -> Option<MeasurementFrame> {
        self.sink.pop_latest()
    }

    /// Block up to `timeout` for the next decoded measurement.
    pub fn wait_for_measurement(&self, timeout: Duration) -> Option<MeasurementFrame> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.sink.pop() {
                return Some(frame);
            }
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    /// The shared measurement sink.
    pub fn measurement_sink(&self) -> Arc<MeasurementSink> {
        Arc::clone(&self.sink)
    }

    // ------------------------------------------
    // Commands
    // ------------------------------------------

    /// Send a command and block up to `timeout` for its response.
    ///
    /// `body` is the sentence body after the vendor prefix, e.g.
    /// `WRG,06,115200`. A device error sentence resolves the command with
    /// `is_error` set rather than failing the call.
    pub fn send_command(
        &self,
        body: &str,
        timeout: Duration,
    ) -> Result<CommandResponse, CommandError> {
        let rx = self.commands.register(body);
        let sentence = ascii::frame_sentence(body);
        self.transport.lock().send(sentence.as_bytes())?;
        rx.recv_timeout(timeout).map_err(|_| CommandError::Timeout)
    }

    // ------------------------------------------
    // Counters
    // ------------------------------------------

    /// Sample the session counters.
    pub fn stats(&self) -> SensorStats {
        let sync = self.synchronizer.lock();
        SensorStats {
            ascii_packets: sync.valid_packet_count(ascii::SYNC),
            binary_packets: sync.valid_packet_count(binary::SYNC),
            bridge_packets: sync.valid_packet_count(bridge::SYNC),
            skipped_bytes: sync.skipped_byte_count(),
            received_bytes: sync.received_byte_count(),
            transport: self.transport.lock().stats(),
        }
    }

    /// Human-readable transport description.
    pub fn connection_info(&self) -> String {
        self.transport.lock().connection_info()
    }
}

impl Drop for Sensor {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::ReplayTransport;

    fn replay_sensor(stream: Vec<u8>) -> Sensor {
        let transport = Box::new(ReplayTransport::from_bytes(stream));
        Sensor::new(transport, &SdkConfig::default())
    }

    fn run_to_completion(sensor: &mut Sensor) {
        sensor.connect().unwrap();
        sensor.join();
    }

    #[test]
    fn test_replay_session_decodes_measurements() {
        let sentence = ascii::frame_sentence("QTN,+0.009,-0.186,-0.304,+0.934");
        let mut sensor = replay_sensor(sentence.as_bytes().repeat(3));

        run_to_completion(&mut sensor);

        assert_eq!(sensor.stats().ascii_packets, 3);
        let frame = sensor.next_measurement().unwrap();
        assert!(frame.attitude.quaternion.is_some());
    }

    #[test]
    fn test_subscription_round_trip() {
        let sensor = replay_sensor(Vec::new());
        let queue = PacketQueue::new(4, 256);

        sensor
            .subscribe_ascii(Arc::clone(&queue), "NL", AsciiFilter::StartsWith)
            .unwrap();
        sensor
            .subscribe_binary(
                Arc::clone(&queue),
                MeasurementGroups::none(),
                BinaryFilter::AnyMatch,
            )
            .unwrap();
        sensor.unsubscribe(&queue);

        assert_eq!(sensor.ascii.lock().subscriber_count(), 0);
        assert_eq!(sensor.binary.lock().subscriber_count(), 0);
    }

    #[test]
    fn test_command_times_out_on_silent_stream() {
        let mut sensor = replay_sensor(Vec::new());
        sensor.connect().unwrap();

        let result = sensor.send_command("RRG,05", Duration::from_millis(20));
        assert!(matches!(result, Err(CommandError::Timeout)));
    }

    #[test]
    fn test_command_resolved_by_replayed_response() {
        // The response is already in the stream; register before connecting
        // so the receive thread finds a pending command to match
        let response = ascii::frame_sentence("RRG,05,115200");
        let mut sensor = replay_sensor(response.as_bytes().to_vec());

        let rx = sensor.commands.register("RRG,05");
        run_to_completion(&mut sensor);

        let resolved = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(!resolved.is_error);
        assert_eq!(resolved.sentence, "NLRRG,05,115200");
    }

    #[test]
    fn test_skipped_bytes_counted() {
        let mut stream = b"garbage".to_vec();
        stream.extend_from_slice(ascii::frame_sentence("QTN,+0.0,+0.0,+0.0,+1.0").as_bytes());
        let mut sensor = replay_sensor(stream);

        run_to_completion(&mut sensor);

        let stats = sensor.stats();
        assert_eq!(stats.ascii_packets, 1);
        assert_eq!(stats.skipped_bytes, 7);
    }
}
