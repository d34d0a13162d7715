//! ASCII sentence grammar
//!
//! Sentences have the form `$<header>,<field>,...*<checksum>\r\n`. The
//! checksum covers every byte between `$` and `*` exclusive and is either
//! two hex digits (XOR-8) or four hex digits (CRC-16). Vendor sentences
//! carry headers beginning with `NL`; a fixed vocabulary of those headers is
//! recognized as measurement output and can be decoded into a
//! `MeasurementFrame`.

use std::time::Instant;

use crate::core::buffer::ByteBuffer;
use crate::core::measurement::{
    attitude_fields, imu_fields, ins_fields, time_fields, MeasurementFrame, MeasurementGroup,
    MeasurementGroups,
};
use crate::core::protocol::{crc16, xor_checksum, Validity};

/// Sync byte opening every sentence.
pub const SYNC: u8 = b'$';

/// Vendor prefix distinguishing device traffic from pass-through text.
pub const VENDOR_PREFIX: &str = "NL";

/// Longest sentence the grammar will consider.
pub const MAX_SENTENCE_LENGTH: usize = 256;

/// Metadata captured for a framed sentence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsciiMetadata {
    /// Header between `$` and the first `,` (or `*`), e.g. `NLYMR`
    pub header: String,
    /// Full sentence length in bytes, terminator included
    pub length: usize,
    /// Capture time
    pub timestamp: Instant,
}

/// Result of scanning for a sentence at a buffer offset.
#[derive(Debug, Clone)]
pub struct FindReturn {
    /// Candidate classification
    pub validity: Validity,
    /// Sentence length for `Valid`, bytes wanted for `Incomplete`, else 0
    pub length: usize,
    /// Captured metadata, present only when `Valid`
    pub metadata: Option<AsciiMetadata>,
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

/// Vendor measurement sentence vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementHeader {
    /// Yaw/pitch/roll, magnetic, acceleration, angular rate
    Ymr,
    /// Attitude quaternion
    Qtn,
    /// Quaternion, magnetic, acceleration, angular rate
    Qmr,
    /// Calibrated inertial measurements
    Imu,
    /// Full navigation solution
    Ins,
    /// Position and velocity fix
    Gps,
}

impl MeasurementHeader {
    /// Map a sentence header (e.g. `NLYMR`) to the vocabulary.
    ///
    /// Returns `None` for headers that are not measurement output, which
    /// includes command responses and error sentences.
    pub fn from_header(header: &str) -> Option<Self> {
        let suffix = header.strip_prefix(VENDOR_PREFIX)?;
        match suffix {
            "YMR" => Some(Self::Ymr),
            "QTN" => Some(Self::Qtn),
            "QMR" => Some(Self::Qmr),
            "IMU" => Some(Self::Imu),
            "INS" => Some(Self::Ins),
            "GPS" => Some(Self::Gps),
            _ => None,
        }
    }
}

/// Locate and classify a sentence starting at `offset`.
pub fn find_packet(buf: &ByteBuffer, offset: usize) -> FindReturn {
    if buf.peek(offset) != Some(SYNC) {
        return FindReturn::invalid();
    }

    // Scan for the checksum delimiter
    let mut star = None;
    for i in (offset + 1)..(offset + MAX_SENTENCE_LENGTH) {
        let Some(byte) = buf.peek(i) else {
            return FindReturn::incomplete(buf.len() - offset + 1);
        };
        if byte == b'*' {
            star = Some(i);
            break;
        }
        if !(0x20..=0x7E).contains(&byte) {
            return FindReturn::invalid();
        }
    }
    let Some(star) = star else {
        return FindReturn::invalid();
    };

    // Two hex digits (XOR-8) or four (CRC-16), then CRLF
    let Some((digits, end)) = checksum_extent(buf, star) else {
        // Terminator not yet in the buffer
        return FindReturn::incomplete(star - offset + 7);
    };
    let Some(digits) = digits else {
        return FindReturn::invalid();
    };

    let body_len = star - offset - 1;
    let mut body = vec![0u8; body_len];
    if !buf.peek_into(&mut body, offset + 1) {
        return FindReturn::invalid();
    }

    let mut text = [0u8; 4];
    for (i, slot) in text[..digits].iter_mut().enumerate() {
        *slot = buf.peek_unchecked(star + 1 + i);
    }
    let Ok(stated) = std::str::from_utf8(&text[..digits])
        .map_err(|_| ())
        .and_then(|s| u32::from_str_radix(s, 16).map_err(|_| ()))
    else {
        return FindReturn::invalid();
    };

    let computed = if digits == 2 {
        xor_checksum(&body) as u32
    } else {
        crc16(&body) as u32
    };
    if stated != computed {
        return FindReturn::invalid();
    }

    let header_end = body.iter().position(|&b| b == b',').unwrap_or(body.len());
    let header = match std::str::from_utf8(&body[..header_end]) {
        Ok(h) if !h.is_empty() => h.to_string(),
        _ => return FindReturn::invalid(),
    };

    FindReturn {
        validity: Validity::Valid,
        length: end - offset,
        metadata: Some(AsciiMetadata {
            header,
            length: end - offset,
            timestamp: Instant::now(),
        }),
    }
}

/// Determine the checksum digit count and the sentence end (exclusive).
///
/// Outer `None` means more bytes are needed; inner `None` means the tail is
/// malformed.
fn checksum_extent(buf: &ByteBuffer, star: usize) -> Option<(Option<usize>, usize)> {
    for digits in [2usize, 4] {
        let cr = star + 1 + digits;
        match buf.peek(cr) {
            None => return None,
            Some(b'\r') => {
                let Some(lf) = buf.peek(cr + 1) else {
                    return None;
                };
                if lf != b'\n' {
                    return Some((None, 0));
                }
                let all_hex = (0..digits).all(|i| buf.peek_unchecked(star + 1 + i).is_ascii_hexdigit());
                if !all_hex {
                    return Some((None, 0));
                }
                return Some((Some(digits), cr + 2));
            }
            Some(_) => continue,
        }
    }
    Some((None, 0))
}

/// Decode a framed measurement sentence into a frame.
///
/// Returns `None` when the payload does not match the header's field list.
pub fn parse_packet(
    buf: &ByteBuffer,
    offset: usize,
    metadata: &AsciiMetadata,
    header: MeasurementHeader,
) -> Option<MeasurementFrame> {
    let mut sentence = vec![0u8; metadata.length];
    if !buf.peek_into(&mut sentence, offset) {
        return None;
    }
    let text = std::str::from_utf8(&sentence).ok()?;
    let payload = &text[1..text.rfind('*')?];
    let fields: Vec<&str> = payload.split(',').skip(1).collect();

    let mut frame = MeasurementFrame {
        timestamp: Some(metadata.timestamp),
        ..Default::default()
    };

    match header {
        MeasurementHeader::Ymr => {
            let v = parse_floats(&fields, 12)?;
            frame.attitude.ypr = Some([v[0], v[1], v[2]]);
            frame.imu.mag = Some([v[3], v[4], v[5]]);
            frame.imu.accel = Some([v[6], v[7], v[8]]);
            frame.imu.gyro = Some([v[9], v[10], v[11]]);
            frame.groups.set(MeasurementGroup::Attitude, attitude_fields::YPR);
            frame.groups.set(
                MeasurementGroup::Imu,
                imu_fields::MAG | imu_fields::ACCEL | imu_fields::GYRO,
            );
        }
        MeasurementHeader::Qtn => {
            let v = parse_floats(&fields, 4)?;
            frame.attitude.quaternion = Some([v[0], v[1], v[2], v[3]]);
            frame
                .groups
                .set(MeasurementGroup::Attitude, attitude_fields::QUATERNION);
        }
        MeasurementHeader::Qmr => {
            let v = parse_floats(&fields, 13)?;
            frame.attitude.quaternion = Some([v[0], v[1], v[2], v[3]]);
            frame.imu.mag = Some([v[4], v[5], v[6]]);
            frame.imu.accel = Some([v[7], v[8], v[9]]);
            frame.imu.gyro = Some([v[10], v[11], v[12]]);
            frame
                .groups
                .set(MeasurementGroup::Attitude, attitude_fields::QUATERNION);
            frame.groups.set(
                MeasurementGroup::Imu,
                imu_fields::MAG | imu_fields::ACCEL | imu_fields::GYRO,
            );
        }
        MeasurementHeader::Imu => {
            let v = parse_floats(&fields, 11)?;
            frame.imu.mag = Some([v[0], v[1], v[2]]);
            frame.imu.accel = Some([v[3], v[4], v[5]]);
            frame.imu.gyro = Some([v[6], v[7], v[8]]);
            frame.imu.temperature = Some(v[9]);
            frame.imu.pressure = Some(v[10]);
            frame.groups.set(MeasurementGroup::Imu, imu_fields::DEFINED);
        }
        MeasurementHeader::Ins => {
            // time, status, ypr, lla, velocity
            if fields.len() != 12 {
                return None;
            }
            let tow: f64 = fields[0].parse().ok()?;
            let status = u16::from_str_radix(fields[1], 16).ok()?;
            let ypr = parse_floats(&fields[2..5], 3)?;
            let lla = parse_doubles(&fields[5..8])?;
            let vel = parse_floats(&fields[8..11], 3)?;
            let _week: u32 = fields[11].parse().ok()?;

            frame.time.time_gps = Some((tow * 1e9) as u64);
            frame.ins.status = Some(status);
            frame.attitude.ypr = Some([ypr[0], ypr[1], ypr[2]]);
            frame.ins.position_lla = Some(lla);
            frame.ins.velocity_ned = Some([vel[0], vel[1], vel[2]]);
            frame.groups.set(MeasurementGroup::Time, time_fields::GPS);
            frame.groups.set(MeasurementGroup::Ins, ins_fields::DEFINED);
            frame.groups.set(MeasurementGroup::Attitude, attitude_fields::YPR);
        }
        MeasurementHeader::Gps => {
            if fields.len() != 7 {
                return None;
            }
            let tow: f64 = fields[0].parse().ok()?;
            let lla = parse_doubles(&fields[1..4])?;
            let vel = parse_floats(&fields[4..7], 3)?;

            frame.time.time_gps = Some((tow * 1e9) as u64);
            frame.ins.position_lla = Some(lla);
            frame.ins.velocity_ned = Some([vel[0], vel[1], vel[2]]);
            frame.groups.set(MeasurementGroup::Time, time_fields::GPS);
            frame
                .groups
                .set(MeasurementGroup::Ins, ins_fields::POSITION | ins_fields::VELOCITY);
        }
    }

    Some(frame)
}

fn parse_floats(fields: &[&str], expected: usize) -> Option<Vec<f32>> {
    if fields.len() != expected {
        return None;
    }
    fields.iter().map(|f| f.trim().parse().ok()).collect()
}

fn parse_doubles(fields: &[&str]) -> Option<[f64; 3]> {
    let v: Option<Vec<f64>> = fields.iter().map(|f| f.trim().parse().ok()).collect();
    let v = v?;
    Some([v[0], v[1], v[2]])
}

/// Frame a vendor sentence body into a complete wire sentence.
///
/// `body` is everything after the vendor prefix, e.g. `YMR,+010.0,...`.
/// The checksum is the 4-digit CRC-16 form.
pub fn frame_sentence(body: &str) -> String {
    let inner = format!("{VENDOR_PREFIX}{body}");
    let crc = crc16(inner.as_bytes());
    format!("${inner}*{crc:04X}\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_from(bytes: &[u8]) -> ByteBuffer {
        let mut buf = ByteBuffer::with_capacity(1024);
        buf.put(bytes).unwrap();
        buf
    }

    #[test]
    fn test_find_valid_crc16() {
        let sentence = frame_sentence("QTN,+0.009,-0.186,-0.304,+0.934");
        let buf = buffer_from(sentence.as_bytes());

        let found = find_packet(&buf, 0);
        assert_eq!(found.validity, Validity::Valid);
        assert_eq!(found.length, sentence.len());
        assert_eq!(found.metadata.unwrap().header, "NLQTN");
    }

    #[test]
    fn test_find_valid_xor() {
        let body = "NLYMR,+010.0,-002.5,+000.1";
        let cs = xor_checksum(body.as_bytes());
        let sentence = format!("${body}*{cs:02X}\r\n");
        let buf = buffer_from(sentence.as_bytes());

        let found = find_packet(&buf, 0);
        assert_eq!(found.validity, Validity::Valid);
    }

    #[test]
    fn test_find_bad_checksum() {
        let buf = buffer_from(b"$NLQTN,+0.0,+0.0,+0.0,+1.0*0000\r\n");
        assert_eq!(find_packet(&buf, 0).validity, Validity::Invalid);
    }

    #[test]
    fn test_find_incomplete() {
        let sentence = frame_sentence("QTN,+0.009,-0.186,-0.304,+0.934");
        let buf = buffer_from(&sentence.as_bytes()[..10]);
        assert_eq!(find_packet(&buf, 0).validity, Validity::Incomplete);

        // Cut inside the checksum tail
        let buf = buffer_from(&sentence.as_bytes()[..sentence.len() - 3]);
        assert_eq!(find_packet(&buf, 0).validity, Validity::Incomplete);
    }

    #[test]
    fn test_find_not_a_sentence() {
        let buf = buffer_from(b"\xFA\x01garbage");
        assert_eq!(find_packet(&buf, 0).validity, Validity::Invalid);

        // Binary byte inside the body
        let buf = buffer_from(b"$NLX\x00YZ*00\r\n");
        assert_eq!(find_packet(&buf, 0).validity, Validity::Invalid);
    }

    #[test]
    fn test_find_at_offset() {
        let sentence = frame_sentence("QTN,+0.009,-0.186,-0.304,+0.934");
        let mut bytes = b"junk".to_vec();
        bytes.extend_from_slice(sentence.as_bytes());
        let buf = buffer_from(&bytes);

        let found = find_packet(&buf, 4);
        assert_eq!(found.validity, Validity::Valid);
        assert_eq!(found.length, sentence.len());
    }

    #[test]
    fn test_measurement_header_vocabulary() {
        assert_eq!(MeasurementHeader::from_header("NLYMR"), Some(MeasurementHeader::Ymr));
        assert_eq!(MeasurementHeader::from_header("NLINS"), Some(MeasurementHeader::Ins));
        // Command responses and foreign sentences are not measurements
        assert_eq!(MeasurementHeader::from_header("NLWRG"), None);
        assert_eq!(MeasurementHeader::from_header("NLERR"), None);
        assert_eq!(MeasurementHeader::from_header("GPGGA"), None);
    }

    #[test]
    fn test_parse_ymr() {
        let sentence = frame_sentence(
            "YMR,+010.5,-002.1,+000.3,+1.09,-0.25,+3.01,-00.01,-00.02,-09.80,-0.001,+0.002,-0.001",
        );
        let buf = buffer_from(sentence.as_bytes());
        let found = find_packet(&buf, 0);
        let metadata = found.metadata.unwrap();

        let frame = parse_packet(&buf, 0, &metadata, MeasurementHeader::Ymr).unwrap();
        assert_eq!(frame.attitude.ypr, Some([10.5, -2.1, 0.3]));
        assert_eq!(frame.imu.accel, Some([-0.01, -0.02, -9.8]));
        assert!(frame
            .groups
            .intersects(&MeasurementGroups::with_group(MeasurementGroup::Imu, imu_fields::MAG)));
    }

    #[test]
    fn test_parse_wrong_field_count() {
        let sentence = frame_sentence("YMR,+010.5,-002.1");
        let buf = buffer_from(sentence.as_bytes());
        let metadata = find_packet(&buf, 0).metadata.unwrap();

        assert!(parse_packet(&buf, 0, &metadata, MeasurementHeader::Ymr).is_none());
    }

    #[test]
    fn test_parse_ins() {
        let sentence = frame_sentence(
            "INS,361200.5,0003,+010.0,-001.0,+000.5,+45.001,-122.998,+095.2,+001.1,-000.4,+000.0,2215",
        );
        let buf = buffer_from(sentence.as_bytes());
        let metadata = find_packet(&buf, 0).metadata.unwrap();

        let frame = parse_packet(&buf, 0, &metadata, MeasurementHeader::Ins).unwrap();
        assert_eq!(frame.ins.status, Some(3));
        assert_eq!(frame.ins.position_lla, Some([45.001, -122.998, 95.2]));
        assert_eq!(frame.time.time_gps, Some(361_200_500_000_000));
    }
}
