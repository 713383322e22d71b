//! Fills sample buffers from the record channels.
//!
//! One cycle: take a free buffer, note the wall-clock time, then for every
//! tick read one record from each channel (in configured order) into a
//! scratch row and scatter it into the sensor regions. The timestamp is
//! written after the last tick and the buffer joins the full queue.

use log::{error, info, warn};
use std::sync::Arc;

use crate::acquisition::{clock::Clock, sensor::SampleChannel};
use crate::buffer::{pool::BufferPool, Provenance};
use crate::error::{AcquisitionError, DataloggerError, Result};
use crate::utils::diagnostics::{Diagnostics, EventKind};

pub struct SampleAggregator {
    pool: BufferPool,
    channels: Vec<Box<dyn SampleChannel>>,
    clock: Arc<dyn Clock>,
    diagnostics: Arc<Diagnostics>,
    scratch: Vec<u8>,
}

impl SampleAggregator {
    /// Fails when the channels' record widths do not add up to one tick of
    /// the buffer layout.
    pub fn new(
        pool: BufferPool,
        channels: Vec<Box<dyn SampleChannel>>,
        clock: Arc<dyn Clock>,
        diagnostics: Arc<Diagnostics>,
    ) -> Result<Self> {
        let sources: usize = channels.iter().map(|c| c.record_width()).sum();
        let layout = pool.layout().bytes_per_tick();
        if sources != layout {
            return Err(DataloggerError::WidthMismatch { sources, layout });
        }

        Ok(Self {
            pool,
            channels,
            clock,
            diagnostics,
            scratch: vec![0u8; layout],
        })
    }

    /// Fills and publishes exactly one buffer. A record that was consumed
    /// but unusable (wrong width, device fault) is zero-filled in place so
    /// every channel stays on the same tick. A closed channel returns the
    /// partially filled buffer to the free queue.
    pub fn fill_one(&mut self) -> std::result::Result<usize, AcquisitionError> {
        let mut buf = self.pool.acquire_empty();
        let stamp = self.clock.now();
        let layout = self.pool.layout().clone();

        for tick in 0..layout.items_per_sensor() {
            let mut cursor = 0;
            for channel in self.channels.iter_mut() {
                let width = channel.record_width();
                let slot = &mut self.scratch[cursor..cursor + width];
                match channel.read_record(slot) {
                    Ok(()) => {}
                    Err(e @ AcquisitionError::Closed(_)) => {
                        self.pool.release_empty(buf);
                        return Err(e);
                    }
                    Err(e) => {
                        warn!("[Aggregator] tick {} zero-filled: {}", tick, e);
                        slot.fill(0);
                    }
                }
                cursor += width;
            }
            layout.scatter_tick(buf.payload_mut(), tick, &self.scratch);
        }

        buf.set_timestamp(&stamp);
        buf.set_provenance(Provenance::Live);
        let id = buf.id();
        self.diagnostics.record(EventKind::Filled, Some(id), Some(stamp));
        self.pool.enqueue_full(buf);
        Ok(id)
    }

    /// Fills buffers until a channel closes.
    pub fn run(mut self) {
        info!(
            "[Aggregator] started: {} channels, {} items per buffer",
            self.channels.len(),
            self.pool.layout().items_per_sensor()
        );
        loop {
            match self.fill_one() {
                Ok(_) => {}
                Err(AcquisitionError::Closed(name)) => {
                    error!("[Aggregator] channel '{}' closed, acquisition stopped", name);
                    break;
                }
                Err(e) => warn!("[Aggregator] buffer discarded: {}", e),
            }
        }
    }
}
