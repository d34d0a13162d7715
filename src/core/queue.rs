//! Bounded subscriber packet queue
//!
//! A single-producer, single-consumer queue of captured packets. The
//! dispatcher (producer side) reserves a slot, writes the packet bytes into
//! it, and commits it with metadata; the consumer pops packets at its own
//! pace. Every operation is non-blocking: a full queue yields `None` from
//! `reserve` and the packet is dropped for that subscriber only.
//!
//! The SPSC discipline is the caller's responsibility: exactly one thread
//! reserves and commits, exactly one thread pops.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::packet::{Packet, PacketDetails};

/// Bounded queue of packets for one subscriber.
pub struct PacketQueue {
    inner: Mutex<VecDeque<Packet>>,
    capacity: usize,
    slot_capacity: usize,
    closed: AtomicBool,
}

impl PacketQueue {
    /// Create a queue holding at most `capacity` packets of up to
    /// `slot_capacity` bytes each.
    pub fn new(capacity: usize, slot_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            slot_capacity,
            closed: AtomicBool::new(false),
        })
    }

    /// Reserve a writable slot, or `None` if the queue is full or closed.
    ///
    /// The slot becomes visible to the consumer only on `commit`; dropping
    /// it uncommitted abandons the reservation.
    pub fn reserve(&self) -> Option<SlotWriter<'_>> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        if self.inner.lock().len() >= self.capacity {
            return None;
        }
        Some(SlotWriter {
            queue: self,
            buf: vec![0u8; self.slot_capacity].into_boxed_slice(),
        })
    }

    /// Pop the oldest packet.
    pub fn pop(&self) -> Option<Packet> {
        self.inner.lock().pop_front()
    }

    /// Number of queued packets.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if no packets are queued.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Maximum number of queued packets.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Byte capacity of each slot.
    pub fn slot_capacity(&self) -> usize {
        self.slot_capacity
    }

    /// Mark the queue defunct.
    ///
    /// Subsequent reservations fail and new subscriptions with this queue
    /// are rejected; already-queued packets can still be drained.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether the consumer has closed the queue.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// A reserved, not-yet-visible queue slot.
pub struct SlotWriter<'a> {
    queue: &'a PacketQueue,
    buf: Box<[u8]>,
}

impl SlotWriter<'_> {
    /// Byte capacity of the slot.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// The writable slot buffer.
    pub fn buffer(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Publish the slot as a packet with the given metadata.
    pub fn commit(self, details: PacketDetails) {
        let packet = Packet::from_parts(self.buf, details);
        self.queue.inner.lock().push_back(packet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn raw_details(length: usize) -> PacketDetails {
        PacketDetails::None {
            length,
            timestamp: Instant::now(),
            first_byte: 0,
        }
    }

    #[test]
    fn test_fifo_order() {
        let queue = PacketQueue::new(4, 16);
        for value in [1u8, 2, 3] {
            let mut slot = queue.reserve().unwrap();
            slot.buffer()[0] = value;
            slot.commit(raw_details(1));
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().unwrap().bytes(), &[1]);
        assert_eq!(queue.pop().unwrap().bytes(), &[2]);
        assert_eq!(queue.pop().unwrap().bytes(), &[3]);
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_reserve_fails_when_full() {
        let queue = PacketQueue::new(2, 16);
        for _ in 0..2 {
            queue.reserve().unwrap().commit(raw_details(0));
        }

        assert!(queue.reserve().is_none());
        queue.pop().unwrap();
        assert!(queue.reserve().is_some());
    }

    #[test]
    fn test_abandoned_slot_not_visible() {
        let queue = PacketQueue::new(2, 16);
        let slot = queue.reserve().unwrap();
        drop(slot);

        assert!(queue.is_empty());
        assert!(queue.reserve().is_some());
    }

    #[test]
    fn test_closed_queue_rejects_reservations() {
        let queue = PacketQueue::new(2, 16);
        queue.reserve().unwrap().commit(raw_details(0));
        queue.close();

        assert!(queue.reserve().is_none());
        // Draining still works after close
        assert!(queue.pop().is_some());
    }

    #[test]
    fn test_spsc_across_threads() {
        let queue = PacketQueue::new(64, 8);
        let producer_queue = Arc::clone(&queue);

        let producer = std::thread::spawn(move || {
            let mut pushed = 0u32;
            while pushed < 100 {
                if let Some(mut slot) = producer_queue.reserve() {
                    slot.buffer()[0] = pushed as u8;
                    slot.commit(raw_details(1));
                    pushed += 1;
                } else {
                    std::thread::yield_now();
                }
            }
        });

        let mut popped = 0u32;
        while popped < 100 {
            if let Some(packet) = queue.pop() {
                assert_eq!(packet.bytes()[0], popped as u8);
                popped += 1;
            } else {
                std::thread::yield_now();
            }
        }
        producer.join().unwrap();
    }
}
