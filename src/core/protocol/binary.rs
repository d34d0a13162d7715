//! Primary binary frame grammar
//!
//! Frame layout: sync `0xFA`, one group-presence byte, one little-endian
//! `u16` field bitmask per present group (in group order), the payload laid
//! out per the group/field tables below, then a big-endian CRC-16 computed
//! over every byte after the sync byte.

use std::time::Instant;

use crate::core::buffer::ByteBuffer;
use crate::core::measurement::{MeasurementFrame, MeasurementGroups, GROUP_COUNT};
use crate::core::protocol::{crc16, Validity};

/// Sync byte opening every primary binary frame.
pub const SYNC: u8 = 0xFA;

/// Largest frame the defined field tables can produce.
pub const MAX_FRAME_LENGTH: usize = 2 + 2 * GROUP_COUNT + 128 + 2;

/// Wire sizes of each field, by group and field bit. Reserved bits size 0.
fn field_size(group: usize, bit: usize) -> usize {
    match (group, bit) {
        // Time: startup, gps, sync-in timestamps
        (0, 0) | (0, 1) | (0, 2) => 8,
        // Imu: mag, accel, gyro as 3x f32; temperature, pressure as f32
        (1, 0) | (1, 1) | (1, 2) => 12,
        (1, 3) | (1, 4) => 4,
        // Attitude: ypr, quaternion, linear accel
        (2, 0) => 12,
        (2, 1) => 16,
        (2, 2) => 12,
        // Ins: status, position lla (3x f64), velocity ned (3x f32)
        (3, 0) => 2,
        (3, 1) => 24,
        (3, 2) => 12,
        _ => 0,
    }
}

/// Parsed frame header: the group-presence byte expanded to per-group field
/// bitmasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryHeader {
    /// Group-presence byte as received
    pub group_byte: u8,
    /// Field bitmask per group; zero for absent groups
    pub fields: [u16; GROUP_COUNT],
}

impl BinaryHeader {
    /// Header length on the wire: sync + group byte + one mask per group.
    pub fn header_len(&self) -> usize {
        2 + 2 * (self.group_byte.count_ones() as usize)
    }

    /// Payload length implied by the field bitmasks.
    pub fn payload_len(&self) -> usize {
        let mut len = 0;
        for group in 0..GROUP_COUNT {
            for bit in 0..16 {
                if self.fields[group] & (1 << bit) != 0 {
                    len += field_size(group, bit);
                }
            }
        }
        len
    }

    /// The header as a measurement bitmask, suitable for filter evaluation.
    pub fn measurement_groups(&self) -> MeasurementGroups {
        let mut groups = MeasurementGroups::none();
        for (i, &mask) in self.fields.iter().enumerate() {
            if mask != 0 {
                groups.set(group_id(i), mask);
            }
        }
        groups
    }
}

fn group_id(index: usize) -> crate::core::measurement::MeasurementGroup {
    use crate::core::measurement::MeasurementGroup::*;
    match index {
        0 => Time,
        1 => Imu,
        2 => Attitude,
        _ => Ins,
    }
}

/// Metadata captured for a framed primary binary packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinaryMetadata {
    /// Parsed header bitmasks
    pub header: BinaryHeader,
    /// Full frame length in bytes, CRC included
    pub length: usize,
    /// Capture time
    pub timestamp: Instant,
}

/// Result of scanning for a frame at a buffer offset.
#[derive(Debug, Clone)]
pub struct FindReturn {
    /// Candidate classification
    pub validity: Validity,
    /// Frame length for `Valid`, bytes wanted for `Incomplete`, else 0
    pub length: usize,
    /// Captured metadata, present only when `Valid`
    pub metadata: Option<BinaryMetadata>,
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

/// Locate and classify a frame starting at `offset`.
pub fn find_packet(buf: &ByteBuffer, offset: usize) -> FindReturn {
    if buf.peek(offset) != Some(SYNC) {
        return FindReturn::invalid();
    }
    let Some(group_byte) = buf.peek(offset + 1) else {
        return FindReturn::incomplete(2);
    };
    // Group bits above the defined groups make the payload unsizeable
    if group_byte == 0 || group_byte & !0x0F != 0 {
        return FindReturn::invalid();
    }

    let mut header = BinaryHeader {
        group_byte,
        fields: [0; GROUP_COUNT],
    };
    let header_len = header.header_len();
    if buf.len() - offset < header_len {
        return FindReturn::incomplete(header_len);
    }

    let mut cursor = offset + 2;
    for group in 0..GROUP_COUNT {
        if group_byte & (1 << group) != 0 {
            let lo = buf.peek_unchecked(cursor);
            let hi = buf.peek_unchecked(cursor + 1);
            header.fields[group] = u16::from_le_bytes([lo, hi]);
            cursor += 2;
        }
    }
    // A present group with an empty field mask carries nothing
    if header.fields.iter().all(|&f| f == 0) {
        return FindReturn::invalid();
    }

    let total = header_len + header.payload_len() + 2;
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
        metadata: Some(BinaryMetadata {
            header,
            length: total,
            timestamp: Instant::now(),
        }),
    }
}

/// Decode a framed packet into a measurement frame.
///
/// Returns `None` when the header sets field bits outside the defined
/// tables; the packet is structurally sound but not decodable.
pub fn parse_packet(
    buf: &ByteBuffer,
    offset: usize,
    metadata: &BinaryMetadata,
) -> Option<MeasurementFrame> {
    let groups = metadata.header.measurement_groups();
    if !groups.is_defined() {
        return None;
    }

    let mut frame = MeasurementFrame {
        groups,
        timestamp: Some(metadata.timestamp),
        ..Default::default()
    };

    let mut cursor = offset + metadata.header.header_len();
    for group in 0..GROUP_COUNT {
        for bit in 0..16 {
            if metadata.header.fields[group] & (1 << bit) == 0 {
                continue;
            }
            let size = field_size(group, bit);
            decode_field(buf, cursor, group, bit, &mut frame);
            cursor += size;
        }
    }
    Some(frame)
}

fn decode_field(buf: &ByteBuffer, at: usize, group: usize, bit: usize, frame: &mut MeasurementFrame) {
    match (group, bit) {
        (0, 0) => frame.time.time_startup = Some(read_u64(buf, at)),
        (0, 1) => frame.time.time_gps = Some(read_u64(buf, at)),
        (0, 2) => frame.time.time_sync_in = Some(read_u64(buf, at)),
        (1, 0) => frame.imu.mag = Some(read_vec3(buf, at)),
        (1, 1) => frame.imu.accel = Some(read_vec3(buf, at)),
        (1, 2) => frame.imu.gyro = Some(read_vec3(buf, at)),
        (1, 3) => frame.imu.temperature = Some(read_f32(buf, at)),
        (1, 4) => frame.imu.pressure = Some(read_f32(buf, at)),
        (2, 0) => frame.attitude.ypr = Some(read_vec3(buf, at)),
        (2, 1) => {
            frame.attitude.quaternion = Some([
                read_f32(buf, at),
                read_f32(buf, at + 4),
                read_f32(buf, at + 8),
                read_f32(buf, at + 12),
            ])
        }
        (2, 2) => frame.attitude.linear_accel = Some(read_vec3(buf, at)),
        (3, 0) => frame.ins.status = Some(read_u16(buf, at)),
        (3, 1) => {
            frame.ins.position_lla = Some([
                read_f64(buf, at),
                read_f64(buf, at + 8),
                read_f64(buf, at + 16),
            ])
        }
        (3, 2) => frame.ins.velocity_ned = Some(read_vec3(buf, at)),
        _ => {}
    }
}

fn read_u16(buf: &ByteBuffer, at: usize) -> u16 {
    u16::from_le_bytes([buf.peek_unchecked(at), buf.peek_unchecked(at + 1)])
}

fn read_u64(buf: &ByteBuffer, at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = buf.peek_unchecked(at + i);
    }
    u64::from_le_bytes(bytes)
}

fn read_f32(buf: &ByteBuffer, at: usize) -> f32 {
    let mut bytes = [0u8; 4];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = buf.peek_unchecked(at + i);
    }
    f32::from_le_bytes(bytes)
}

fn read_f64(buf: &ByteBuffer, at: usize) -> f64 {
    let mut bytes = [0u8; 8];
    for (i, b) in bytes.iter_mut().enumerate() {
        *b = buf.peek_unchecked(at + i);
    }
    f64::from_le_bytes(bytes)
}

fn read_vec3(buf: &ByteBuffer, at: usize) -> [f32; 3] {
    [
        read_f32(buf, at),
        read_f32(buf, at + 4),
        read_f32(buf, at + 8),
    ]
}

/// Assemble a complete frame from a measurement bitmask and payload bytes.
///
/// The payload must already be laid out per the field tables; the group
/// byte, field masks, and CRC are added here.
pub fn encode_frame(groups: &MeasurementGroups, payload: &[u8]) -> Vec<u8> {
    use crate::core::measurement::MeasurementGroup;

    let mut group_byte = 0u8;
    let mut masks = Vec::new();
    for (i, group) in MeasurementGroup::all().iter().enumerate() {
        let mask = groups.get(*group);
        if mask != 0 {
            group_byte |= 1 << i;
            masks.extend_from_slice(&mask.to_le_bytes());
        }
    }

    let mut frame = vec![SYNC, group_byte];
    frame.extend_from_slice(&masks);
    frame.extend_from_slice(payload);
    let crc = crc16(&frame[1..]);
    frame.extend_from_slice(&crc.to_be_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::measurement::{imu_fields, ins_fields, MeasurementGroup};

    fn buffer_from(bytes: &[u8]) -> ByteBuffer {
        let mut buf = ByteBuffer::with_capacity(1024);
        buf.put(bytes).unwrap();
        buf
    }

    fn imu_frame() -> Vec<u8> {
        let groups = MeasurementGroups::with_group(
            MeasurementGroup::Imu,
            imu_fields::ACCEL | imu_fields::TEMPERATURE,
        );
        let mut payload = Vec::new();
        for v in [0.0f32, 0.0, -9.81] {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        payload.extend_from_slice(&21.5f32.to_le_bytes());
        encode_frame(&groups, &payload)
    }

    #[test]
    fn test_find_valid() {
        let bytes = imu_frame();
        let buf = buffer_from(&bytes);

        let found = find_packet(&buf, 0);
        assert_eq!(found.validity, Validity::Valid);
        assert_eq!(found.length, bytes.len());

        let header = found.metadata.unwrap().header;
        assert_eq!(header.group_byte, 0b0010);
        assert_eq!(header.payload_len(), 16);
    }

    #[test]
    fn test_find_bad_crc() {
        let mut bytes = imu_frame();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        let buf = buffer_from(&bytes);

        assert_eq!(find_packet(&buf, 0).validity, Validity::Invalid);
    }

    #[test]
    fn test_find_incomplete() {
        let bytes = imu_frame();
        for cut in [1, 2, 5, bytes.len() - 1] {
            let buf = buffer_from(&bytes[..cut]);
            assert_eq!(
                find_packet(&buf, 0).validity,
                Validity::Incomplete,
                "cut at {cut}"
            );
        }
    }

    #[test]
    fn test_find_rejects_unknown_groups() {
        let buf = buffer_from(&[SYNC, 0x10, 0x00]);
        assert_eq!(find_packet(&buf, 0).validity, Validity::Invalid);

        let buf = buffer_from(&[SYNC, 0x00]);
        assert_eq!(find_packet(&buf, 0).validity, Validity::Invalid);
    }

    #[test]
    fn test_parse_fields() {
        let bytes = imu_frame();
        let buf = buffer_from(&bytes);
        let metadata = find_packet(&buf, 0).metadata.unwrap();

        let frame = parse_packet(&buf, 0, &metadata).unwrap();
        assert_eq!(frame.imu.accel, Some([0.0, 0.0, -9.81]));
        assert_eq!(frame.imu.temperature, Some(21.5));
        assert_eq!(frame.imu.mag, None);
    }

    #[test]
    fn test_parse_rejects_reserved_bits() {
        // Reserved field bit: structurally valid, not decodable
        let groups = MeasurementGroups::with_group(MeasurementGroup::Ins, 1 << 12);
        let bytes = encode_frame(&groups, &[]);
        let buf = buffer_from(&bytes);

        let found = find_packet(&buf, 0);
        assert_eq!(found.validity, Validity::Valid);
        assert!(parse_packet(&buf, 0, &found.metadata.unwrap()).is_none());
    }

    #[test]
    fn test_parse_multi_group() {
        let mut groups = MeasurementGroups::none();
        groups.set(MeasurementGroup::Imu, imu_fields::GYRO);
        groups.set(MeasurementGroup::Ins, ins_fields::STATUS);

        let mut payload = Vec::new();
        for v in [0.01f32, -0.02, 0.03] {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        payload.extend_from_slice(&0x0004u16.to_le_bytes());

        let bytes = encode_frame(&groups, &payload);
        let buf = buffer_from(&bytes);
        let metadata = find_packet(&buf, 0).metadata.unwrap();

        let frame = parse_packet(&buf, 0, &metadata).unwrap();
        assert_eq!(frame.imu.gyro, Some([0.01, -0.02, 0.03]));
        assert_eq!(frame.ins.status, Some(4));
    }
}
