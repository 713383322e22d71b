//! Sensor drivers, reader tasks and the record channels the aggregator
//! consumes.
//!
//! Each physical source gets a reader thread. On every trigger tick the
//! reader samples its driver once and pushes the record onto a bounded
//! queue; the aggregator drains those queues in a fixed order. A full queue
//! blocks the reader, never the trigger: the stall surfaces as trigger
//! overruns on that reader's tick queue, and no sampled record is lost.

use crossbeam::channel::{bounded, Receiver, Sender};
use log::{debug, info, warn};
use rand::random_range;
use std::{
    io,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

use crate::acquisition::trigger::TickSubscriber;
use crate::config::SourceConfig;
use crate::error::AcquisitionError;

/// Hardware access for one sampling source.
pub trait SensorDriver: Send {
    fn name(&self) -> &str;

    /// Bytes produced per sample.
    fn record_width(&self) -> usize;

    /// Samples once into `out` (exactly `record_width` bytes).
    fn sample(&mut self, out: &mut [u8]) -> Result<(), AcquisitionError>;
}

/// Producer of fixed-width records, one per tick, consumed in order.
pub trait SampleChannel: Send {
    fn name(&self) -> &str;

    fn record_width(&self) -> usize;

    /// Blocks for the next record and copies it into `out`.
    fn read_record(&mut self, out: &mut [u8]) -> Result<(), AcquisitionError>;
}

/// Noise around a resting level, big-endian per axis.
pub struct SimulatedSensor {
    name: String,
    axis_widths: Vec<usize>,
}

impl SimulatedSensor {
    /// Axis widths are clamped to 1..=4 bytes.
    pub fn new(name: &str, axis_widths: Vec<usize>) -> Self {
        Self {
            name: name.to_string(),
            axis_widths: axis_widths.into_iter().map(|w| w.clamp(1, 4)).collect(),
        }
    }

    pub fn from_source(source: &SourceConfig) -> Self {
        let widths = source
            .sensors
            .iter()
            .map(|s| s.bytes_per_item as usize)
            .collect();
        Self::new(&source.name, widths)
    }
}

impl SensorDriver for SimulatedSensor {
    fn name(&self) -> &str {
        &self.name
    }

    fn record_width(&self) -> usize {
        self.axis_widths.iter().sum()
    }

    fn sample(&mut self, out: &mut [u8]) -> Result<(), AcquisitionError> {
        let expected = self.record_width();
        if out.len() != expected {
            return Err(AcquisitionError::RecordWidth {
                channel: self.name.clone(),
                got: out.len(),
                expected,
            });
        }

        let mut cursor = 0;
        for &width in &self.axis_widths {
            // quarter of full scale for the width, kept within i32
            let amplitude: i32 = 1 << (8 * width - 3);
            let value = random_range(-amplitude..amplitude);
            let be = value.to_be_bytes();
            out[cursor..cursor + width].copy_from_slice(&be[4 - width..]);
            cursor += width;
        }
        Ok(())
    }
}

/// Receiving side of a reader task's record queue.
pub struct QueuedChannel {
    name: String,
    width: usize,
    rx: Receiver<Vec<u8>>,
}

impl QueuedChannel {
    pub fn new(name: &str, width: usize, rx: Receiver<Vec<u8>>) -> Self {
        Self {
            name: name.to_string(),
            width,
            rx,
        }
    }

    /// Records waiting in the queue.
    pub fn backlog(&self) -> usize {
        self.rx.len()
    }
}

impl SampleChannel for QueuedChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn record_width(&self) -> usize {
        self.width
    }

    fn read_record(&mut self, out: &mut [u8]) -> Result<(), AcquisitionError> {
        let record = self
            .rx
            .recv()
            .map_err(|_| AcquisitionError::Closed(self.name.clone()))?;
        if record.len() != self.width || out.len() != self.width {
            return Err(AcquisitionError::RecordWidth {
                channel: self.name.clone(),
                got: record.len(),
                expected: self.width,
            });
        }
        out.copy_from_slice(&record);
        Ok(())
    }
}

/// Per-reader sample counts.
#[derive(Debug, Default)]
pub struct ReaderStats {
    pub sampled: AtomicU64,
    pub failed: AtomicU64,
    /// Records that found the queue full and had to wait for the consumer.
    pub stalled: AtomicU64,
}

pub struct SensorReader {
    pub channel: QueuedChannel,
    pub stats: Arc<ReaderStats>,
    pub handle: JoinHandle<()>,
}

/// Spawns the reader task for `driver`, paced by `ticks`.
pub fn spawn_sensor_reader(
    mut driver: Box<dyn SensorDriver>,
    ticks: TickSubscriber,
    queue_depth: usize,
) -> io::Result<SensorReader> {
    let name = driver.name().to_string();
    let width = driver.record_width();
    let (tx, rx): (Sender<Vec<u8>>, Receiver<Vec<u8>>) = bounded(queue_depth);
    let stats = Arc::new(ReaderStats::default());
    let counters = stats.clone();

    let handle = thread::Builder::new()
        .name(format!("reader_{}", name))
        .spawn(move || {
            info!("[{}] reader started ({} bytes per record)", driver.name(), width);
            while ticks.wait().is_some() {
                let mut record = vec![0u8; width];
                // A failed sample still produces a record so every region
                // stays tick-aligned.
                match driver.sample(&mut record) {
                    Ok(()) => {
                        counters.sampled.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        warn!("[{}] {}", driver.name(), e);
                        record.fill(0);
                    }
                }

                if tx.is_full() {
                    let stalled = counters.stalled.fetch_add(1, Ordering::Relaxed) + 1;
                    if stalled.is_power_of_two() {
                        warn!("[{}] record queue full, reader waiting ({} stalls)", driver.name(), stalled);
                    }
                }
                if tx.send(record).is_err() {
                    break;
                }
            }
            debug!("[{}] reader stopped.", driver.name());
        })?;

    Ok(SensorReader {
        channel: QueuedChannel::new(&name, width, rx),
        stats,
        handle,
    })
}
