//! Fixed pool of reusable sample buffers.
//!
//! Two bounded crossbeam channels carry buffers by value: the free queue and
//! the full queue. Both are sized to the pool, so a hand-off never blocks on
//! capacity; only `acquire_*` block, and that back-pressure is the flow
//! control between producers and consumers.

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use log::{error, info};
use std::{sync::Arc, time::Duration};

use crate::buffer::{layout::BufferLayout, SampleBuffer};
use crate::error::{DataloggerError, Result};

#[derive(Clone)]
pub struct BufferPool {
    layout: Arc<BufferLayout>,
    empty_tx: Sender<SampleBuffer>,
    empty_rx: Receiver<SampleBuffer>,
    full_tx: Sender<SampleBuffer>,
    full_rx: Receiver<SampleBuffer>,
    allocated: usize,
}

impl BufferPool {
    /// Allocates `count` buffers once for the process lifetime.
    pub fn allocate(layout: Arc<BufferLayout>, count: usize) -> Result<Self> {
        Self::allocate_with(layout, count, |_, bytes| {
            let mut region = Vec::new();
            region.try_reserve_exact(bytes).ok()?;
            region.resize(bytes, 0u8);
            Some(region.into_boxed_slice())
        })
    }

    /// Allocates through `alloc`. A slot whose allocation fails is logged
    /// and skipped; the pool runs degraded with the remaining buffers.
    pub fn allocate_with<F>(layout: Arc<BufferLayout>, count: usize, mut alloc: F) -> Result<Self>
    where
        F: FnMut(usize, usize) -> Option<Box<[u8]>>,
    {
        let size = layout.max_buffer_size();
        let (empty_tx, empty_rx) = bounded(count);
        let (full_tx, full_rx) = bounded(count);

        let mut allocated = 0;
        for slot in 0..count {
            match alloc(slot, size) {
                Some(region) if region.len() == size => {
                    let buf = SampleBuffer::new(slot, region, &layout);
                    if empty_tx.send(buf).is_ok() {
                        allocated += 1;
                        info!("[BufferPool] slot {} allocated ({} bytes)", slot, size);
                    }
                }
                _ => {
                    error!("[BufferPool] {}", DataloggerError::Allocation { slot, bytes: size });
                }
            }
        }

        if allocated == 0 {
            return Err(DataloggerError::NoBuffers);
        }

        Ok(Self {
            layout,
            empty_tx,
            empty_rx,
            full_tx,
            full_rx,
            allocated,
        })
    }

    pub fn layout(&self) -> &Arc<BufferLayout> {
        &self.layout
    }

    /// Buffers that exist; fixed after allocation.
    pub fn capacity(&self) -> usize {
        self.allocated
    }

    /// Blocks until a free buffer is available.
    pub fn acquire_empty(&self) -> SampleBuffer {
        loop {
            // Both channel ends live in `self`, so recv cannot disconnect.
            if let Ok(buf) = self.empty_rx.recv() {
                return buf;
            }
        }
    }

    pub fn try_acquire_empty(&self) -> Option<SampleBuffer> {
        self.empty_rx.try_recv().ok()
    }

    /// Blocks until a full buffer is available.
    pub fn acquire_full(&self) -> SampleBuffer {
        loop {
            if let Ok(buf) = self.full_rx.recv() {
                return buf;
            }
        }
    }

    /// Bounded wait for a full buffer; `None` on timeout.
    pub fn acquire_full_timeout(&self, wait: Duration) -> Option<SampleBuffer> {
        match self.full_rx.recv_timeout(wait) {
            Ok(buf) => Some(buf),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_acquire_full(&self) -> Option<SampleBuffer> {
        self.full_rx.try_recv().ok()
    }

    pub fn release_empty(&self, mut buf: SampleBuffer) {
        buf.reset_attempts();
        if let Err(e) = self.empty_tx.send(buf) {
            error!("[BufferPool] free queue closed, buffer {} lost", e.0.id());
        }
    }

    /// Appends to the tail of the full queue.
    pub fn enqueue_full(&self, buf: SampleBuffer) {
        if let Err(e) = self.full_tx.send(buf) {
            error!("[BufferPool] full queue closed, buffer {} lost", e.0.id());
        }
    }

    pub fn free_len(&self) -> usize {
        self.empty_rx.len()
    }

    pub fn full_len(&self) -> usize {
        self.full_rx.len()
    }
}
