//! Byte layout of a sample buffer.
//!
//! ```text
//! [items:2][sensors:1][rate:2][station:1][timestamp:12]
//! [id0:1][samples0 ...][id1:1][samples1 ...] ...
//! ```
//!
//! Multi-byte header fields are big-endian. Offsets are computed once and
//! shared by reference; nothing recomputes them per cycle.

use crate::error::{DataloggerError, Result};

pub const CONTROL_HEADER_SIZE: usize = 18;
pub const TIMESTAMP_OFFSET: usize = 6;
pub const TIMESTAMP_LEN: usize = 12;

/// Configured sensor region: id byte plus sample width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSpec {
    pub id: u8,
    pub bytes_per_item: usize,
}

/// A sensor region with its resolved payload offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorSlot {
    pub id: u8,
    pub bytes_per_item: usize,
    /// First payload byte; the id byte sits at `offset - 1`.
    pub offset: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferLayout {
    items_per_sensor: u16,
    sample_rate: u16,
    station_id: u8,
    slots: Vec<SensorSlot>,
    bytes_per_tick: usize,
    max_buffer_size: usize,
}

impl BufferLayout {
    pub fn new(
        items_per_sensor: u16,
        sample_rate: u16,
        station_id: u8,
        sensors: &[SensorSpec],
    ) -> Result<Self> {
        if sensors.is_empty() {
            return Err(DataloggerError::Layout("no sensors configured".into()));
        }
        if sensors.len() > u8::MAX as usize {
            return Err(DataloggerError::Layout(format!(
                "{} sensors do not fit the 1-byte sensor count",
                sensors.len()
            )));
        }
        if items_per_sensor == 0 {
            return Err(DataloggerError::Layout("items_per_sensor is zero".into()));
        }

        let items = items_per_sensor as usize;
        let mut slots = Vec::with_capacity(sensors.len());
        let mut offset = CONTROL_HEADER_SIZE + 1;
        let mut bytes_per_tick = 0;

        for spec in sensors {
            if spec.bytes_per_item == 0 {
                return Err(DataloggerError::Layout(format!(
                    "sensor {} has zero bytes per item",
                    spec.id
                )));
            }
            slots.push(SensorSlot {
                id: spec.id,
                bytes_per_item: spec.bytes_per_item,
                offset,
            });
            bytes_per_tick += spec.bytes_per_item;
            offset += items * spec.bytes_per_item + 1;
        }

        // The loop advanced past one id byte that does not exist.
        let max_buffer_size = offset - 1;

        Ok(Self {
            items_per_sensor,
            sample_rate,
            station_id,
            slots,
            bytes_per_tick,
            max_buffer_size,
        })
    }

    /// Transmittable size: header plus every sensor region.
    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    pub fn items_per_sensor(&self) -> usize {
        self.items_per_sensor as usize
    }

    pub fn sample_rate(&self) -> u16 {
        self.sample_rate
    }

    pub fn station_id(&self) -> u8 {
        self.station_id
    }

    pub fn slots(&self) -> &[SensorSlot] {
        &self.slots
    }

    /// Sum of one sample from every sensor.
    pub fn bytes_per_tick(&self) -> usize {
        self.bytes_per_tick
    }

    /// Byte offset of `tick`'s sample for the sensor at `slot` index.
    #[inline]
    pub fn sample_offset(&self, slot: usize, tick: usize) -> usize {
        let s = &self.slots[slot];
        s.offset + tick * s.bytes_per_item
    }

    /// Writes the fixed control header and sensor id bytes. The timestamp
    /// field is zeroed until the first fill.
    pub fn write_header(&self, bytes: &mut [u8]) {
        bytes[0..2].copy_from_slice(&self.items_per_sensor.to_be_bytes());
        bytes[2] = self.slots.len() as u8;
        bytes[3..5].copy_from_slice(&self.sample_rate.to_be_bytes());
        bytes[5] = self.station_id;
        bytes[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + TIMESTAMP_LEN].fill(0);
        for slot in &self.slots {
            bytes[slot.offset - 1] = slot.id;
        }
    }

    /// Whether `bytes` carries this layout's fixed header and id bytes.
    /// The timestamp field is not compared.
    pub fn header_matches(&self, bytes: &[u8]) -> bool {
        if bytes.len() != self.max_buffer_size {
            return false;
        }
        let mut expected = [0u8; TIMESTAMP_OFFSET];
        expected[0..2].copy_from_slice(&self.items_per_sensor.to_be_bytes());
        expected[2] = self.slots.len() as u8;
        expected[3..5].copy_from_slice(&self.sample_rate.to_be_bytes());
        expected[5] = self.station_id;
        bytes[..TIMESTAMP_OFFSET] == expected
            && self.slots.iter().all(|s| bytes[s.offset - 1] == s.id)
    }

    /// Scatters one tick of concatenated sensor samples (in slot order)
    /// into their regions.
    pub fn scatter_tick(&self, bytes: &mut [u8], tick: usize, record: &[u8]) {
        let mut cursor = 0;
        for (i, slot) in self.slots.iter().enumerate() {
            let at = self.sample_offset(i, tick);
            bytes[at..at + slot.bytes_per_item]
                .copy_from_slice(&record[cursor..cursor + slot.bytes_per_item]);
            cursor += slot.bytes_per_item;
        }
    }
}
