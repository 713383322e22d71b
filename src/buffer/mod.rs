//! Sample buffers and the pool they cycle through.
//!
//! A `SampleBuffer` is one delivery unit: control header plus every sensor
//! region. Buffers are never cloned; they move between stages by value, so
//! at any instant exactly one stage owns a given buffer.

pub mod layout;
pub mod pool;

use std::fmt;

use layout::{BufferLayout, TIMESTAMP_LEN, TIMESTAMP_OFFSET};

/// Where a buffer's payload came from. Never transmitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provenance {
    /// Freshly sampled.
    Live,
    /// Reloaded from storage.
    Replayed,
}

/// `YYMMDDHHmmSS` as ASCII digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp([u8; TIMESTAMP_LEN]);

impl Timestamp {
    /// All-zero field, as written at allocation.
    pub const ZERO: Timestamp = Timestamp([0; TIMESTAMP_LEN]);

    /// Accepts exactly twelve ASCII digits.
    pub fn parse(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() != TIMESTAMP_LEN || !bytes.iter().all(u8::is_ascii_digit) {
            return None;
        }
        let mut out = [0u8; TIMESTAMP_LEN];
        out.copy_from_slice(bytes);
        Some(Timestamp(out))
    }

    pub fn from_bytes(bytes: [u8; TIMESTAMP_LEN]) -> Self {
        Timestamp(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; TIMESTAMP_LEN] {
        &self.0
    }

    /// Storage file name. Bytes that are not digits (an unstamped buffer)
    /// map to '0' so the name stays a valid 12-digit catalog entry.
    pub fn file_name(&self) -> String {
        self.0
            .iter()
            .map(|&b| if b.is_ascii_digit() { b as char } else { '0' })
            .collect()
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.file_name())
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// One fixed-size delivery unit.
pub struct SampleBuffer {
    slot: usize,
    bytes: Box<[u8]>,
    provenance: Provenance,
    attempts: u32,
}

impl SampleBuffer {
    /// Wraps an allocated region and stamps the fixed header into it.
    pub(crate) fn new(slot: usize, mut bytes: Box<[u8]>, layout: &BufferLayout) -> Self {
        layout.write_header(&mut bytes);
        Self {
            slot,
            bytes,
            provenance: Provenance::Live,
            attempts: 0,
        }
    }

    /// Pool slot this buffer was allocated into; stable for the process lifetime.
    pub fn id(&self) -> usize {
        self.slot
    }

    /// Transmittable region (header + payload).
    pub fn payload(&self) -> &[u8] {
        &self.bytes
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn timestamp(&self) -> Timestamp {
        let mut ts = [0u8; TIMESTAMP_LEN];
        ts.copy_from_slice(&self.bytes[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + TIMESTAMP_LEN]);
        Timestamp(ts)
    }

    pub fn set_timestamp(&mut self, ts: &Timestamp) {
        self.bytes[TIMESTAMP_OFFSET..TIMESTAMP_OFFSET + TIMESTAMP_LEN].copy_from_slice(ts.as_bytes());
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    pub fn set_provenance(&mut self, provenance: Provenance) {
        self.provenance = provenance;
    }

    /// Failed uplink attempts since the last success or storage fallback.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub(crate) fn record_attempt(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    pub(crate) fn reset_attempts(&mut self) {
        self.attempts = 0;
    }

    /// Rewrites the fixed header after the bytes were overwritten by
    /// something that turned out not to be a valid buffer.
    pub(crate) fn restore_header(&mut self, layout: &BufferLayout) {
        layout.write_header(&mut self.bytes);
    }
}

impl fmt::Debug for SampleBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SampleBuffer")
            .field("slot", &self.slot)
            .field("len", &self.bytes.len())
            .field("timestamp", &self.timestamp())
            .field("provenance", &self.provenance)
            .field("attempts", &self.attempts)
            .finish()
    }
}
