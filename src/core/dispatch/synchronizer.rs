//! Packet synchronizer
//!
//! Drives the dispatchers over the receive buffer. Each pass scans from the
//! head of the unconsumed region, offers every offset whose byte matches a
//! dispatcher's sync byte to that dispatcher in registration (priority)
//! order, and advances past consumed packets. Bytes that no dispatcher
//! claims are counted as skipped and optionally copied to a skipped-byte
//! queue for an observer.
//!
//! Forward progress is guaranteed: every pass either consumes at least the
//! found packet, defers on a genuinely incomplete prefix, or flushes bytes
//! nobody claimed.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::core::buffer::{BufferOverflow, ByteBuffer};
use crate::core::dispatch::{DispatchError, PacketDispatcher};
use crate::core::packet::PacketDetails;
use crate::core::protocol::Validity;
use crate::core::queue::PacketQueue;

/// Hook invoked with every non-fatal dispatch error.
pub type ErrorHook = Box<dyn Fn(&DispatchError) + Send>;

struct DispatcherSlot {
    dispatcher: Arc<Mutex<dyn PacketDispatcher>>,
    sync_byte: u8,
    valid_count: u64,
    invalid_count: u64,
}

/// Scan-and-dispatch driver over one receive buffer.
pub struct PacketSynchronizer {
    buffer: ByteBuffer,
    dispatchers: Vec<DispatcherSlot>,
    skipped_queue: Option<Arc<PacketQueue>>,
    error_hook: Option<ErrorHook>,
    skipped_bytes: u64,
    received_bytes: u64,
    prev_validity: Validity,
    prev_bytes_requested: usize,
    packet_max_length: usize,
}

impl PacketSynchronizer {
    /// Create a synchronizer with a receive buffer of `buffer_capacity`
    /// bytes. `packet_max_length` bounds how long an `Incomplete` claim may
    /// hold back scanning before the dispatcher is considered too greedy.
    pub fn new(buffer_capacity: usize, packet_max_length: usize) -> Self {
        Self {
            buffer: ByteBuffer::with_capacity(buffer_capacity),
            dispatchers: Vec::new(),
            skipped_queue: None,
            error_hook: None,
            skipped_bytes: 0,
            received_bytes: 0,
            prev_validity: Validity::Invalid,
            prev_bytes_requested: 0,
            packet_max_length,
        }
    }

    /// Register a dispatcher. Registration order is priority order.
    pub fn add_dispatcher(&mut self, dispatcher: Arc<Mutex<dyn PacketDispatcher>>) {
        let sync_byte = dispatcher.lock().sync_byte();
        self.dispatchers.push(DispatcherSlot {
            dispatcher,
            sync_byte,
            valid_count: 0,
            invalid_count: 0,
        });
    }

    /// Register a queue receiving copies of skipped bytes.
    pub fn register_skipped_byte_queue(
        &mut self,
        queue: Arc<PacketQueue>,
    ) -> Result<(), DispatchError> {
        if queue.is_closed() {
            return Err(DispatchError::QueueClosed);
        }
        self.skipped_queue = Some(queue);
        Ok(())
    }

    /// Stop copying skipped bytes.
    pub fn deregister_skipped_byte_queue(&mut self) {
        self.skipped_queue = None;
    }

    /// Install a hook observing every non-fatal dispatch error.
    pub fn set_error_hook(&mut self, hook: ErrorHook) {
        self.error_hook = Some(hook);
    }

    /// Append received bytes to the buffer.
    pub fn feed(&mut self, data: &[u8]) -> Result<(), BufferOverflow> {
        self.buffer.put(data)
    }

    /// Bytes currently buffered and unconsumed.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Total bytes classified as skipped.
    pub fn skipped_byte_count(&self) -> u64 {
        self.skipped_bytes
    }

    /// Total bytes consumed from the buffer.
    pub fn received_byte_count(&self) -> u64 {
        self.received_bytes
    }

    /// Valid packets found for the dispatcher with this sync byte.
    pub fn valid_packet_count(&self, sync_byte: u8) -> u64 {
        self.dispatchers
            .iter()
            .find(|d| d.sync_byte == sync_byte)
            .map_or(0, |d| d.valid_count)
    }

    /// Invalid candidates rejected for the dispatcher with this sync byte.
    pub fn invalid_packet_count(&self, sync_byte: u8) -> u64 {
        self.dispatchers
            .iter()
            .find(|d| d.sync_byte == sync_byte)
            .map_or(0, |d| d.invalid_count)
    }

    /// Scan for the next packet and dispatch it.
    ///
    /// Returns `true` when more data is needed before anything further can
    /// happen, `false` when a packet was dispatched and another pass may
    /// find more.
    pub fn dispatch_next_packet(&mut self) -> bool {
        let buffered = self.buffer.len();
        if buffered == 0
            || (self.prev_validity == Validity::Incomplete && buffered < self.prev_bytes_requested)
        {
            return true;
        }

        for index in 0..buffered {
            let byte = self.buffer.peek_unchecked(index);
            for slot in 0..self.dispatchers.len() {
                if self.dispatchers[slot].sync_byte != byte {
                    continue;
                }
                let result = self.dispatchers[slot]
                    .dispatcher
                    .lock()
                    .find_packet(&self.buffer, index);

                match result.validity {
                    Validity::Valid => {
                        self.dispatchers[slot].valid_count += 1;
                        trace!(
                            sync_byte = byte,
                            length = result.length,
                            "Packet found"
                        );
                        let outcome = self.dispatchers[slot]
                            .dispatcher
                            .lock()
                            .dispatch_packet(&self.buffer, index);
                        if let Err(error) = outcome {
                            self.report(&error);
                        }

                        // Consume at least one byte so a misbehaving
                        // dispatcher cannot stall the scan
                        let consumed = result.length.max(1);
                        if let Err(error) = self.copy_skipped(index) {
                            self.report(&error);
                        }
                        self.received_bytes += (index + consumed) as u64;
                        self.buffer.discard(index + consumed);
                        self.prev_validity = Validity::Valid;
                        return false;
                    }
                    Validity::Invalid => {
                        // Might have been a stray sync byte; keep scanning
                        self.dispatchers[slot].invalid_count += 1;
                    }
                    Validity::Incomplete => {
                        // An incomplete claim longer than any real packet
                        // means the dispatcher is too greedy; let the
                        // others look at these bytes
                        if buffered - index > self.packet_max_length {
                            continue;
                        }
                        debug!(
                            sync_byte = byte,
                            available = buffered - index,
                            "Possible packet, waiting for more data"
                        );
                        if let Err(error) = self.copy_skipped(index) {
                            self.report(&error);
                        }
                        self.received_bytes += index as u64;
                        self.buffer.discard(index);
                        self.prev_validity = Validity::Incomplete;
                        self.prev_bytes_requested = result.length;
                        return true;
                    }
                }
            }
        }

        // Nobody claimed anything: flush the whole region as skipped
        if let Err(error) = self.copy_skipped(buffered) {
            self.report(&error);
        }
        self.received_bytes += buffered as u64;
        self.buffer.discard(buffered);
        self.prev_validity = Validity::Invalid;
        true
    }

    fn report(&self, error: &DispatchError) {
        debug!(%error, "Dispatch error");
        if let Some(hook) = &self.error_hook {
            hook(error);
        }
    }

    /// Record `count` head bytes as skipped, copying them to the observer
    /// queue when one is registered.
    fn copy_skipped(&mut self, count: usize) -> Result<(), DispatchError> {
        if count == 0 {
            return Ok(());
        }
        self.skipped_bytes += count as u64;
        let Some(queue) = &self.skipped_queue else {
            return Ok(());
        };

        let mut at = 0;
        while at < count {
            let Some(mut slot) = queue.reserve() else {
                return Err(DispatchError::QueueFull);
            };
            let chunk = (count - at).min(slot.capacity());
            self.buffer.peek_into(&mut slot.buffer()[..chunk], at);
            let first_byte = self.buffer.peek_unchecked(at);
            slot.commit(PacketDetails::None {
                length: chunk,
                timestamp: Instant::now(),
                first_byte,
            });
            at += chunk;
        }
        Ok(())
    }
}
