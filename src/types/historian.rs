//! The standard historian record: a 24-byte key and a 24-byte value.

use uuid::Uuid;

use crate::common::le::{get_u64, put_u64};

use super::TreeType;

/// Key of one historian measurement.
///
/// Ordered by timestamp, then point id, then entry number, so a scan over a
/// time range returns measurements in time order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HistorianKey {
    /// Timestamp in ticks.
    pub timestamp: u64,
    /// Measured point.
    pub point_id: u64,
    /// Distinguishes several entries at the same timestamp and point.
    pub entry_number: u64,
}

impl HistorianKey {
    /// Create a key.
    pub fn new(timestamp: u64, point_id: u64, entry_number: u64) -> Self {
        Self {
            timestamp,
            point_id,
            entry_number,
        }
    }
}

impl TreeType for HistorianKey {
    const TYPE_ID: Uuid = Uuid::from_u128(0x6527_d41b_9d04_4bfa_8133_05273d521d46);
    const SIZE: usize = 24;

    fn set_min(&mut self) {
        *self = Self::new(0, 0, 0);
    }

    fn set_max(&mut self) {
        *self = Self::new(u64::MAX, u64::MAX, u64::MAX);
    }

    fn read_bytes(&mut self, bytes: &[u8]) {
        self.timestamp = get_u64(bytes, 0);
        self.point_id = get_u64(bytes, 8);
        self.entry_number = get_u64(bytes, 16);
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        put_u64(bytes, 0, self.timestamp);
        put_u64(bytes, 8, self.point_id);
        put_u64(bytes, 16, self.entry_number);
    }
}

/// Value of one historian measurement: three raw 64-bit words.
///
/// Most points only use `value1`; the accessors reinterpret it as a float.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct HistorianValue {
    pub value1: u64,
    pub value2: u64,
    pub value3: u64,
}

impl HistorianValue {
    /// Create a value.
    pub fn new(value1: u64, value2: u64, value3: u64) -> Self {
        Self {
            value1,
            value2,
            value3,
        }
    }

    /// `value1` as a single-precision float.
    pub fn as_f32(&self) -> f32 {
        f32::from_bits(self.value1 as u32)
    }

    /// Store a single-precision float in `value1`.
    pub fn set_f32(&mut self, value: f32) {
        self.value1 = u64::from(value.to_bits());
    }

    /// `value1` as a double-precision float.
    pub fn as_f64(&self) -> f64 {
        f64::from_bits(self.value1)
    }
}

impl TreeType for HistorianValue {
    const TYPE_ID: Uuid = Uuid::from_u128(0x24dd_e7dc_67f9_42b6_a11b_e27c3e62d9ef);
    const SIZE: usize = 24;

    fn set_min(&mut self) {
        *self = Self::new(0, 0, 0);
    }

    fn set_max(&mut self) {
        *self = Self::new(u64::MAX, u64::MAX, u64::MAX);
    }

    fn read_bytes(&mut self, bytes: &[u8]) {
        self.value1 = get_u64(bytes, 0);
        self.value2 = get_u64(bytes, 8);
        self.value3 = get_u64(bytes, 16);
    }

    fn write_bytes(&self, bytes: &mut [u8]) {
        put_u64(bytes, 0, self.value1);
        put_u64(bytes, 8, self.value2);
        put_u64(bytes, 16, self.value3);
    }
}
