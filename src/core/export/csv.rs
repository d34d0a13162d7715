//! Measurement CSV export

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::core::buffer::ByteBuffer;
use crate::core::export::PacketWriter;
use crate::core::measurement::MeasurementFrame;
use crate::core::packet::{Packet, PacketDetails};
use crate::core::protocol::ascii::{self, MeasurementHeader};
use crate::core::protocol::binary;

const HEADER_ROW: &str = "time_startup_ns,time_gps_ns,yaw,pitch,roll,quat_x,quat_y,quat_z,quat_w,\
                          accel_x,accel_y,accel_z,gyro_x,gyro_y,gyro_z,mag_x,mag_y,mag_z,\
                          temperature,pressure,latitude,longitude,altitude,vel_n,vel_e,vel_d,status";

/// Writes one CSV row per decodable measurement packet.
///
/// Packets that do not decode (fragments, pass-through text, command
/// responses) are skipped.
pub struct MeasurementCsvWriter {
    out: BufWriter<File>,
}

impl MeasurementCsvWriter {
    /// Create the output file with a header row.
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "{HEADER_ROW}")?;
        Ok(Self { out })
    }

    fn write_row(&mut self, frame: &MeasurementFrame) -> std::io::Result<()> {
        let mut row = String::new();
        push_opt_u64(&mut row, frame.time.time_startup);
        push_opt_u64(&mut row, frame.time.time_gps);
        push_vec3(&mut row, frame.attitude.ypr);
        push_vec4(&mut row, frame.attitude.quaternion);
        push_vec3(&mut row, frame.imu.accel);
        push_vec3(&mut row, frame.imu.gyro);
        push_vec3(&mut row, frame.imu.mag);
        push_opt_f32(&mut row, frame.imu.temperature);
        push_opt_f32(&mut row, frame.imu.pressure);
        push_lla(&mut row, frame.ins.position_lla);
        push_vec3(&mut row, frame.ins.velocity_ned);
        if let Some(status) = frame.ins.status {
            row.push_str(&format!("{status:04X}"));
        }
        writeln!(self.out, "{row}")
    }
}

impl PacketWriter for MeasurementCsvWriter {
    fn write_packet(&mut self, packet: &Packet) -> std::io::Result<()> {
        match frame_from_packet(packet) {
            Some(frame) => self.write_row(&frame),
            None => Ok(()),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.out.flush()
    }
}

/// Decode a captured packet back into a measurement frame.
pub fn frame_from_packet(packet: &Packet) -> Option<MeasurementFrame> {
    let mut buf = ByteBuffer::with_capacity(packet.len().max(1));
    buf.put(packet.bytes()).ok()?;

    match packet.details() {
        PacketDetails::Ascii(metadata) => {
            let header = MeasurementHeader::from_header(&metadata.header)?;
            ascii::parse_packet(&buf, 0, metadata, header)
        }
        PacketDetails::Binary(metadata) => binary::parse_packet(&buf, 0, metadata),
        _ => None,
    }
}

fn push_opt_u64(row: &mut String, value: Option<u64>) {
    if let Some(v) = value {
        row.push_str(&v.to_string());
    }
    row.push(',');
}

fn push_opt_f32(row: &mut String, value: Option<f32>) {
    if let Some(v) = value {
        row.push_str(&format!("{v:.6}"));
    }
    row.push(',');
}

fn push_vec3(row: &mut String, value: Option<[f32; 3]>) {
    match value {
        Some(v) => {
            for component in v {
                row.push_str(&format!("{component:.6},"));
            }
        }
        None => row.push_str(",,,"),
    }
}

fn push_vec4(row: &mut String, value: Option<[f32; 4]>) {
    match value {
        Some(v) => {
            for component in v {
                row.push_str(&format!("{component:.6},"));
            }
        }
        None => row.push_str(",,,,"),
    }
}

fn push_lla(row: &mut String, value: Option<[f64; 3]>) {
    match value {
        Some(v) => {
            for component in v {
                row.push_str(&format!("{component:.9},"));
            }
        }
        None => row.push_str(",,,"),
    }
}
