//! Measurement JSON Lines export

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::core::export::csv::frame_from_packet;
use crate::core::export::PacketWriter;
use crate::core::packet::Packet;

/// Writes one JSON object per decodable measurement packet.
pub struct MeasurementJsonlWriter {
    out: BufWriter<File>,
}

impl MeasurementJsonlWriter {
    /// Create the output file.
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
        })
    }
}

impl PacketWriter for MeasurementJsonlWriter {
    fn write_packet(&mut self, packet: &Packet) -> std::io::Result<()> {
        let Some(frame) = frame_from_packet(packet) else {
            return Ok(());
        };
        let line = serde_json::to_string(&frame)?;
        writeln!(self.out, "{line}")
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }
}
