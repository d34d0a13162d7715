//! Raw byte writers
//!
//! `RawPacketWriter` appends every packet's bytes verbatim, producing a log
//! that can be replayed through the pipeline later. `SkippedByteWriter`
//! keeps only the bytes no protocol claimed, which is the stream to look at
//! when a device seems to be speaking garbage.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::core::export::PacketWriter;
use crate::core::packet::{Packet, PacketDetails};

/// Writes every packet's raw bytes to a file.
pub struct RawPacketWriter {
    out: BufWriter<File>,
}

impl RawPacketWriter {
    /// Create the output file, truncating an existing one.
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
        })
    }
}

impl PacketWriter for RawPacketWriter {
    fn write_packet(&mut self, packet: &Packet) -> std::io::Result<()> {
        self.out.write_all(packet.bytes())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }
}

/// Writes only unrecognized (skipped) bytes to a file.
pub struct SkippedByteWriter {
    out: BufWriter<File>,
}

impl SkippedByteWriter {
    /// Create the output file, truncating an existing one.
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
        })
    }
}

impl PacketWriter for SkippedByteWriter {
    fn write_packet(&mut self, packet: &Packet) -> std::io::Result<()> {
        match packet.details() {
            PacketDetails::None { .. } => self.out.write_all(packet.bytes()),
            _ => Ok(()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn raw_packet(payload: &[u8]) -> Packet {
        Packet::from_parts(
            payload.to_vec().into_boxed_slice(),
            PacketDetails::None {
                length: payload.len(),
                timestamp: Instant::now(),
                first_byte: payload.first().copied().unwrap_or(0),
            },
        )
    }

    #[test]
    fn test_raw_writer_appends_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.bin");

        let mut writer = RawPacketWriter::create(&path).unwrap();
        writer.write_packet(&raw_packet(b"abc")).unwrap();
        writer.write_packet(&raw_packet(b"def")).unwrap();
        writer.flush().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
    }

    #[test]
    fn test_skipped_writer_filters_recognized_packets() {
        use crate::core::protocol::ascii;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skipped.bin");

        let sentence = ascii::frame_sentence("QTN,+0.0,+0.0,+0.0,+1.0");
        let mut buf = crate::core::buffer::ByteBuffer::with_capacity(256);
        buf.put(sentence.as_bytes()).unwrap();
        let metadata = ascii::find_packet(&buf, 0).metadata.unwrap();
        let ascii_packet = Packet::from_parts(
            sentence.as_bytes().to_vec().into_boxed_slice(),
            PacketDetails::Ascii(metadata),
        );

        let mut writer = SkippedByteWriter::create(&path).unwrap();
        writer.write_packet(&raw_packet(b"noise")).unwrap();
        writer.write_packet(&ascii_packet).unwrap();
        writer.flush().unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"noise");
    }
}
