//! Packet exporters
//!
//! An exporter is the consumer side of one subscriber queue: it owns the
//! queue and a drain thread that hands each popped packet to a
//! `PacketWriter`. The producer (dispatcher) never blocks; the exporter's
//! `QueueMode` decides how aggressively the consumer keeps up.

pub mod csv;
pub mod jsonl;
pub mod raw;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::Local;
use tracing::warn;

use crate::core::packet::Packet;
use crate::core::queue::PacketQueue;

/// How the consumer side reacts to queue pressure.
///
/// The dispatcher side is always a single non-blocking attempt per packet;
/// these modes only shape the drain cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueMode {
    /// Spin the drain loop without sleeping; the producer is expected to
    /// retry dropped packets itself
    Force,
    /// Best effort: drain what is there, then back off
    #[default]
    Try,
    /// Catch-up mode: retry with a short sleep so a slow consumer
    /// eventually drains a burst
    Retry,
}

impl QueueMode {
    fn idle_wait(&self) -> Option<Duration> {
        match self {
            QueueMode::Force => None,
            QueueMode::Try => Some(Duration::from_millis(10)),
            QueueMode::Retry => Some(Duration::from_millis(1)),
        }
    }
}

/// Destination for drained packets.
pub trait PacketWriter: Send {
    /// Write one packet.
    fn write_packet(&mut self, packet: &Packet) -> std::io::Result<()>;

    /// Flush buffered output.
    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Owns a subscriber queue and drains it on a background thread.
pub struct Exporter {
    queue: Arc<PacketQueue>,
    mode: QueueMode,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Exporter {
    /// Create an exporter with its own queue.
    pub fn new(queue_capacity: usize, slot_capacity: usize, mode: QueueMode) -> Self {
        Self {
            queue: PacketQueue::new(queue_capacity, slot_capacity),
            mode,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// The queue to subscribe with.
    pub fn queue(&self) -> Arc<PacketQueue> {
        Arc::clone(&self.queue)
    }

    /// Whether the drain thread is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Start draining into `writer`.
    pub fn start(&mut self, mut writer: impl PacketWriter + 'static) {
        if self.thread.is_some() {
            return;
        }
        self.running.store(true, Ordering::Release);

        let queue = Arc::clone(&self.queue);
        let running = Arc::clone(&self.running);
        let mode = self.mode;
        self.thread = Some(std::thread::spawn(move || {
            loop {
                while let Some(packet) = queue.pop() {
                    if let Err(error) = writer.write_packet(&packet) {
                        warn!(%error, "Exporter write failed");
                    }
                }
                if !running.load(Ordering::Acquire) {
                    break;
                }
                match mode.idle_wait() {
                    Some(wait) => std::thread::sleep(wait),
                    None => std::thread::yield_now(),
                }
            }
            if let Err(error) = writer.flush() {
                warn!(%error, "Exporter flush failed");
            }
        }));
    }

    /// Stop the drain thread after a final drain, closing the queue.
    ///
    /// Unsubscribe the queue from its dispatcher first; pushes attempted
    /// after the close are dropped and reported as queue-full.
    pub fn stop(&mut self) {
        self.queue.close();
        self.running.store(false, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Exporter {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Generate an export filename with a timestamp.
pub fn generate_export_filename(prefix: &str, extension: &str) -> String {
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");
    format!("{prefix}_{timestamp}.{extension}")
}
