//! Bridge frame grammar
//!
//! Bridge frames carry one primary binary packet split across several
//! fragments, for links whose MTU is smaller than the packet. Layout: sync
//! `0xFB`, message id, 1-based fragment index, fragment count, little-endian
//! `u16` payload length, payload, big-endian CRC-16 over every byte after
//! the sync byte.
//!
//! Fragment payloads are the primary packet's bytes after its sync byte and
//! before its CRC; reassembly prepends the primary sync byte and re-stamps
//! the CRC.

use std::time::Instant;

use crate::core::buffer::ByteBuffer;
use crate::core::protocol::{crc16, Validity};

/// Sync byte opening every bridge frame.
pub const SYNC: u8 = 0xFB;

/// Fixed header length including the sync byte.
pub const HEADER_LENGTH: usize = 6;

/// Largest payload a single fragment may carry.
pub const MAX_FRAGMENT_PAYLOAD: usize = 1024;

/// Parsed fragment header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeHeader {
    /// Identifies which message this fragment belongs to
    pub message_id: u8,
    /// 1-based position within the message
    pub fragment_index: u8,
    /// Total fragments in the message
    pub fragment_count: u8,
    /// Bytes of payload in this fragment
    pub payload_len: u16,
}

/// Metadata captured for a framed bridge fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeMetadata {
    /// Parsed fragment header
    pub header: BridgeHeader,
    /// Full frame length in bytes, CRC included
    pub length: usize,
    /// Capture time
    pub timestamp: Instant,
}

/// Result of scanning for a fragment at a buffer offset.
#[derive(Debug, Clone)]
pub struct FindReturn {
    /// Candidate classification
    pub validity: Validity,
    /// Frame length for `Valid`, bytes wanted for `Incomplete`, else 0
    pub length: usize,
    /// Captured metadata, present only when `Valid`
    pub metadata: Option<BridgeMetadata>,
}

impl FindReturn {
    fn invalid() -> Self {
        Self {
            validity: Validity::Invalid,
            length: 0,
            metadata: None,
        }
    }

    fn incomplete(wanted: usize) -> Self {
        Self {
            validity: Validity::Incomplete,
            length: wanted,
            metadata: None,
        }
    }
}

/// Locate and classify a fragment starting at `offset`.
pub fn find_packet(buf: &ByteBuffer, offset: usize) -> FindReturn {
    if buf.peek(offset) != Some(SYNC) {
        return FindReturn::invalid();
    }
    if buf.len() - offset < HEADER_LENGTH {
        return FindReturn::incomplete(HEADER_LENGTH);
    }

    let header = BridgeHeader {
        message_id: buf.peek_unchecked(offset + 1),
        fragment_index: buf.peek_unchecked(offset + 2),
        fragment_count: buf.peek_unchecked(offset + 3),
        payload_len: u16::from_le_bytes([
            buf.peek_unchecked(offset + 4),
            buf.peek_unchecked(offset + 5),
        ]),
    };

    if header.fragment_index == 0
        || header.fragment_count == 0
        || header.fragment_index > header.fragment_count
        || header.payload_len as usize > MAX_FRAGMENT_PAYLOAD
    {
        return FindReturn::invalid();
    }

    let total = HEADER_LENGTH + header.payload_len as usize + 2;
    if buf.len() - offset < total {
        return FindReturn::incomplete(total);
    }

    let mut body = vec![0u8; total - 3];
    if !buf.peek_into(&mut body, offset + 1) {
        return FindReturn::invalid();
    }
    let computed = crc16(&body);
    let stated = u16::from_be_bytes([
        buf.peek_unchecked(offset + total - 2),
        buf.peek_unchecked(offset + total - 1),
    ]);
    if computed != stated {
        return FindReturn::invalid();
    }

    FindReturn {
        validity: Validity::Valid,
        length: total,
        metadata: Some(BridgeMetadata {
            header,
            length: total,
            timestamp: Instant::now(),
        }),
    }
}

/// Assemble a single fragment frame.
pub fn encode_fragment(message_id: u8, index: u8, count: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![SYNC, message_id, index, count];
    frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    frame.extend_from_slice(payload);
    let crc = crc16(&frame[1..]);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame
}

/// Split a primary binary frame into bridge fragments.
///
/// The primary frame's sync byte and CRC are stripped; each chunk of the
/// remaining body becomes one fragment payload.
pub fn fragment_primary_frame(primary: &[u8], message_id: u8, chunk_len: usize) -> Vec<Vec<u8>> {
    let body = &primary[1..primary.len() - 2];
    let count = body.len().div_ceil(chunk_len);
    body.chunks(chunk_len)
        .enumerate()
        .map(|(i, chunk)| encode_fragment(message_id, (i + 1) as u8, count as u8, chunk))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_from(bytes: &[u8]) -> ByteBuffer {
        let mut buf = ByteBuffer::with_capacity(4096);
        buf.put(bytes).unwrap();
        buf
    }

    #[test]
    fn test_find_valid() {
        let bytes = encode_fragment(7, 1, 3, &[0xAA, 0xBB, 0xCC]);
        let buf = buffer_from(&bytes);

        let found = find_packet(&buf, 0);
        assert_eq!(found.validity, Validity::Valid);
        assert_eq!(found.length, bytes.len());

        let header = found.metadata.unwrap().header;
        assert_eq!(header.message_id, 7);
        assert_eq!(header.fragment_index, 1);
        assert_eq!(header.fragment_count, 3);
        assert_eq!(header.payload_len, 3);
    }

    #[test]
    fn test_find_rejects_bad_indices() {
        // Index 0 and index > count are both malformed
        let mut zero_index = encode_fragment(1, 1, 2, &[0x01]);
        zero_index[2] = 0;
        let buf = buffer_from(&zero_index);
        assert_eq!(find_packet(&buf, 0).validity, Validity::Invalid);

        let mut past_count = encode_fragment(1, 1, 2, &[0x01]);
        past_count[2] = 3;
        let buf = buffer_from(&past_count);
        assert_eq!(find_packet(&buf, 0).validity, Validity::Invalid);
    }

    #[test]
    fn test_find_incomplete() {
        let bytes = encode_fragment(1, 1, 1, &[0x01, 0x02, 0x03, 0x04]);
        for cut in [3, HEADER_LENGTH, bytes.len() - 1] {
            let buf = buffer_from(&bytes[..cut]);
            assert_eq!(find_packet(&buf, 0).validity, Validity::Incomplete);
        }
    }

    #[test]
    fn test_find_bad_crc() {
        let mut bytes = encode_fragment(1, 1, 1, &[0x01, 0x02]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let buf = buffer_from(&bytes);
        assert_eq!(find_packet(&buf, 0).validity, Validity::Invalid);
    }

    #[test]
    fn test_fragment_primary_frame() {
        use crate::core::measurement::{imu_fields, MeasurementGroup, MeasurementGroups};
        use crate::core::protocol::binary;

        let groups = MeasurementGroups::with_group(MeasurementGroup::Imu, imu_fields::ACCEL);
        let mut payload = Vec::new();
        for v in [1.0f32, 2.0, 3.0] {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        let primary = binary::encode_frame(&groups, &payload);

        let fragments = fragment_primary_frame(&primary, 9, 6);
        assert!(fragments.len() > 1);

        // Concatenated payloads reproduce the primary body
        let mut body = Vec::new();
        for frag in &fragments {
            body.extend_from_slice(&frag[HEADER_LENGTH..frag.len() - 2]);
        }
        assert_eq!(&body[..], &primary[1..primary.len() - 2]);
    }
}
