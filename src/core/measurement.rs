//! Decoded measurement model
//!
//! A `MeasurementFrame` is the structured form of one packet's payload,
//! grouped the way the device groups its outputs. `MeasurementGroups` is the
//! bitmask type used both in binary packet headers and in subscriber /
//! interest filtering. `MeasurementSink` is the shared bounded queue of
//! decoded frames that all dispatchers feed.

use std::collections::VecDeque;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;

/// Number of measurement groups the device can emit.
pub const GROUP_COUNT: usize = 4;

/// Measurement group identifiers, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementGroup {
    /// Timing outputs
    Time = 0,
    /// Inertial outputs (accelerometer, gyro, magnetometer, environment)
    Imu = 1,
    /// Attitude solution outputs
    Attitude = 2,
    /// Navigation solution outputs
    Ins = 3,
}

impl MeasurementGroup {
    /// All groups, in wire order.
    pub fn all() -> &'static [MeasurementGroup] {
        &[
            MeasurementGroup::Time,
            MeasurementGroup::Imu,
            MeasurementGroup::Attitude,
            MeasurementGroup::Ins,
        ]
    }
}

/// Field bits within the Time group.
pub mod time_fields {
    /// Nanoseconds since device startup
    pub const STARTUP: u16 = 1 << 0;
    /// GPS time of week, nanoseconds
    pub const GPS: u16 = 1 << 1;
    /// Time of last sync-in pulse, nanoseconds
    pub const SYNC_IN: u16 = 1 << 2;
    /// Mask of all defined Time fields
    pub const DEFINED: u16 = STARTUP | GPS | SYNC_IN;
}

/// Field bits within the IMU group.
pub mod imu_fields {
    /// Magnetometer, gauss
    pub const MAG: u16 = 1 << 0;
    /// Accelerometer, m/s^2
    pub const ACCEL: u16 = 1 << 1;
    /// Angular rate, rad/s
    pub const GYRO: u16 = 1 << 2;
    /// Temperature, deg C
    pub const TEMPERATURE: u16 = 1 << 3;
    /// Pressure, kPa
    pub const PRESSURE: u16 = 1 << 4;
    /// Mask of all defined IMU fields
    pub const DEFINED: u16 = MAG | ACCEL | GYRO | TEMPERATURE | PRESSURE;
}

/// Field bits within the Attitude group.
pub mod attitude_fields {
    /// Yaw, pitch, roll, degrees
    pub const YPR: u16 = 1 << 0;
    /// Attitude quaternion (x, y, z, w)
    pub const QUATERNION: u16 = 1 << 1;
    /// Linear acceleration in body frame, m/s^2
    pub const LINEAR_ACCEL: u16 = 1 << 2;
    /// Mask of all defined Attitude fields
    pub const DEFINED: u16 = YPR | QUATERNION | LINEAR_ACCEL;
}

/// Field bits within the INS group.
pub mod ins_fields {
    /// Solution status word
    pub const STATUS: u16 = 1 << 0;
    /// Position as latitude, longitude, altitude
    pub const POSITION: u16 = 1 << 1;
    /// Velocity in north, east, down frame, m/s
    pub const VELOCITY: u16 = 1 << 2;
    /// Mask of all defined INS fields
    pub const DEFINED: u16 = STATUS | POSITION | VELOCITY;
}

/// Per-group field bitmasks.
///
/// Used as a binary packet header (which outputs a packet carries), as a
/// subscriber filter, and as a dispatcher's decode-interest mask. An empty
/// value has every bit clear.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MeasurementGroups {
    fields: [u16; GROUP_COUNT],
}

impl MeasurementGroups {
    /// Empty mask: no groups, no fields.
    pub fn none() -> Self {
        Self::default()
    }

    /// Every bit of every group set.
    pub fn all() -> Self {
        Self {
            fields: [u16::MAX; GROUP_COUNT],
        }
    }

    /// Build a mask with a single group's field bits set.
    pub fn with_group(group: MeasurementGroup, field_mask: u16) -> Self {
        let mut groups = Self::default();
        groups.set(group, field_mask);
        groups
    }

    /// Set the field bitmask for one group.
    pub fn set(&mut self, group: MeasurementGroup, field_mask: u16) {
        self.fields[group as usize] = field_mask;
    }

    /// Get the field bitmask for one group.
    pub fn get(&self, group: MeasurementGroup) -> u16 {
        self.fields[group as usize]
    }

    /// Check whether any bit is set in any group.
    pub fn is_empty(&self) -> bool {
        self.fields.iter().all(|&f| f == 0)
    }

    /// Check whether any bit is set in both masks.
    pub fn intersects(&self, other: &MeasurementGroups) -> bool {
        self.fields
            .iter()
            .zip(other.fields.iter())
            .any(|(a, b)| a & b != 0)
    }

    /// Union of two masks.
    pub fn union(&self, other: &MeasurementGroups) -> Self {
        let mut fields = [0u16; GROUP_COUNT];
        for (i, f) in fields.iter_mut().enumerate() {
            *f = self.fields[i] | other.fields[i];
        }
        Self { fields }
    }

    /// Check whether only defined field bits are set.
    pub fn is_defined(&self) -> bool {
        let defined = [
            time_fields::DEFINED,
            imu_fields::DEFINED,
            attitude_fields::DEFINED,
            ins_fields::DEFINED,
        ];
        self.fields
            .iter()
            .zip(defined.iter())
            .all(|(f, d)| f & !d == 0)
    }
}

/// Timing outputs.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct TimeGroup {
    /// Nanoseconds since device startup
    pub time_startup: Option<u64>,
    /// GPS time of week, nanoseconds
    pub time_gps: Option<u64>,
    /// Time of last sync-in pulse, nanoseconds
    pub time_sync_in: Option<u64>,
}

/// Inertial outputs.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ImuGroup {
    /// Magnetometer reading, gauss
    pub mag: Option<[f32; 3]>,
    /// Acceleration, m/s^2
    pub accel: Option<[f32; 3]>,
    /// Angular rate, rad/s
    pub gyro: Option<[f32; 3]>,
    /// Temperature, deg C
    pub temperature: Option<f32>,
    /// Pressure, kPa
    pub pressure: Option<f32>,
}

/// Attitude solution outputs.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct AttitudeGroup {
    /// Yaw, pitch, roll, degrees
    pub ypr: Option<[f32; 3]>,
    /// Attitude quaternion (x, y, z, w)
    pub quaternion: Option<[f32; 4]>,
    /// Linear acceleration in body frame, m/s^2
    pub linear_accel: Option<[f32; 3]>,
}

/// Navigation solution outputs.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct InsGroup {
    /// Solution status word
    pub status: Option<u16>,
    /// Latitude (deg), longitude (deg), altitude (m)
    pub position_lla: Option<[f64; 3]>,
    /// Velocity in north, east, down frame, m/s
    pub velocity_ned: Option<[f32; 3]>,
}

/// One decoded measurement: the structured form of a single packet.
///
/// Only the fields present in the source packet are populated; `groups`
/// records which ones.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MeasurementFrame {
    /// Which groups and fields are populated
    pub groups: MeasurementGroups,
    /// Capture time of the source packet
    #[serde(skip)]
    pub timestamp: Option<Instant>,
    /// Timing outputs
    pub time: TimeGroup,
    /// Inertial outputs
    pub imu: ImuGroup,
    /// Attitude outputs
    pub attitude: AttitudeGroup,
    /// Navigation outputs
    pub ins: InsGroup,
}

/// Shared bounded queue of decoded measurement frames.
///
/// All dispatchers of a session push into the same sink; the application
/// reads from it. Every operation is non-blocking. A sink constructed with
/// capacity 0 is disabled: dispatchers skip decode work entirely.
pub struct MeasurementSink {
    queue: Mutex<VecDeque<MeasurementFrame>>,
    capacity: usize,
}

impl MeasurementSink {
    /// Create a sink holding at most `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Whether decode-to-sink is enabled at all.
    pub fn is_enabled(&self) -> bool {
        self.capacity > 0
    }

    /// Push a frame, failing if the sink is full or disabled.
    ///
    /// Returns the frame back to the caller on failure so nothing is lost
    /// silently.
    pub fn try_push(&self, frame: MeasurementFrame) -> Result<(), MeasurementFrame> {
        if self.capacity == 0 {
            return Err(frame);
        }
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            return Err(frame);
        }
        queue.push_back(frame);
        Ok(())
    }

    /// Pop the oldest frame.
    pub fn pop(&self) -> Option<MeasurementFrame> {
        self.queue.lock().pop_front()
    }

    /// Pop the newest frame, discarding everything older.
    pub fn pop_latest(&self) -> Option<MeasurementFrame> {
        let mut queue = self.queue.lock();
        let latest = queue.pop_back();
        queue.clear();
        latest
    }

    /// Number of queued frames.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Check if no frames are queued.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }

    /// Maximum number of queued frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
