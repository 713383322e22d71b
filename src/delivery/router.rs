//! Router: decides where each full buffer goes.
//!
//! Waits a bounded time for a full buffer so that, when the pipeline is
//! idle, it can pull buffers stranded behind a path that went away back into
//! the full queue and emit the periodic health report.

use log::{debug, info, warn};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::availability::{AvailabilityState, HardwareFlags};
use crate::buffer::{pool::BufferPool, Provenance, SampleBuffer};
use crate::config::DataloggerConfig;
use crate::delivery::{catalog::PendingFiles, queue::DeliveryQueue};
use crate::utils::diagnostics::{Diagnostics, EventKind, HealthReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Uplink,
    Storage,
    /// Neither path usable: back to the full-queue tail.
    Requeue,
}

/// Routing table over (connected, mounted, provenance).
pub fn decide(flags: HardwareFlags, provenance: Provenance) -> Route {
    let connected = flags.contains(HardwareFlags::TRANSPORT_CONNECTED);
    let mounted = flags.contains(HardwareFlags::STORAGE_MOUNTED);

    match (connected, mounted, provenance) {
        (true, _, _) => Route::Uplink,
        // Replayed buffers go back to storage too while the transport is down.
        (false, true, Provenance::Live | Provenance::Replayed) => Route::Storage,
        (false, false, _) => Route::Requeue,
    }
}

pub struct Router {
    pool: BufferPool,
    uplink: Arc<DeliveryQueue>,
    storage: Arc<DeliveryQueue>,
    pending: Arc<PendingFiles>,
    availability: Arc<AvailabilityState>,
    diagnostics: Arc<Diagnostics>,
    wait: Duration,
    report_interval: Duration,
    last_report: Instant,
}

impl Router {
    pub fn new(
        config: &DataloggerConfig,
        pool: BufferPool,
        uplink: Arc<DeliveryQueue>,
        storage: Arc<DeliveryQueue>,
        pending: Arc<PendingFiles>,
        availability: Arc<AvailabilityState>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            pool,
            uplink,
            storage,
            pending,
            availability,
            diagnostics,
            wait: config.diagnostics.router_wait(),
            report_interval: config.diagnostics.report_interval(),
            last_report: Instant::now(),
        }
    }

    /// Hands `buf` to the path the current flags allow.
    pub fn route(&self, buf: SampleBuffer) -> Route {
        let route = decide(self.availability.get(), buf.provenance());
        let (id, stamp) = (buf.id(), buf.timestamp());

        match route {
            Route::Uplink => {
                self.diagnostics.record(EventKind::RoutedUplink, Some(id), Some(stamp));
                self.uplink.push_back(buf);
            }
            Route::Storage => {
                self.diagnostics.record(EventKind::RoutedStorage, Some(id), Some(stamp));
                self.storage.push_back(buf);
            }
            Route::Requeue => {
                self.diagnostics.record(EventKind::Requeued, Some(id), Some(stamp));
                debug!("[Router] no path for buffer {} ({}), re-queued", id, stamp);
                self.pool.enqueue_full(buf);
            }
        }
        route
    }

    /// One routing decision, or housekeeping when nothing arrived in time.
    pub fn step(&mut self) -> Option<Route> {
        let routed = match self.pool.acquire_full_timeout(self.wait) {
            Some(buf) => {
                let route = self.route(buf);
                if route == Route::Requeue {
                    // Park until either path may come back instead of spinning
                    // on the same buffer.
                    self.availability.wait_until_timeout(
                        HardwareFlags::TRANSPORT_CONNECTED | HardwareFlags::STORAGE_MOUNTED,
                        false,
                        self.wait,
                    );
                }
                Some(route)
            }
            None => {
                self.housekeeping();
                None
            }
        };

        if self.last_report.elapsed() >= self.report_interval {
            info!("[Router] {}", self.health());
            self.last_report = Instant::now();
        }
        routed
    }

    /// Moves buffers queued for a path that is now unusable back into the
    /// full queue. Returns how many moved.
    pub fn housekeeping(&self) -> usize {
        let flags = self.availability.get();
        let mut moved = 0;

        if !flags.contains(HardwareFlags::TRANSPORT_CONNECTED) && !self.uplink.is_empty() {
            moved += self.drain_back(&self.uplink);
        }
        if !flags.contains(HardwareFlags::STORAGE_MOUNTED) && !self.storage.is_empty() {
            moved += self.drain_back(&self.storage);
        }
        moved
    }

    fn drain_back(&self, queue: &DeliveryQueue) -> usize {
        let stranded = queue.drain();
        let count = stranded.len();
        for buf in stranded {
            self.diagnostics.record(EventKind::Drained, Some(buf.id()), Some(buf.timestamp()));
            self.pool.enqueue_full(buf);
        }
        if count > 0 {
            warn!("[Router] {} path down, {} buffers returned to the full queue", queue.name(), count);
        }
        count
    }

    pub fn health(&self) -> HealthReport {
        health_report(
            &self.pool,
            &self.uplink,
            &self.storage,
            &self.pending,
            &self.availability,
            &self.diagnostics,
        )
    }

    pub fn run(mut self) {
        info!("[Router] started, wait {:?}", self.wait);
        loop {
            self.step();
        }
    }
}

/// Snapshot of queue depths, flags and counters.
pub fn health_report(
    pool: &BufferPool,
    uplink: &DeliveryQueue,
    storage: &DeliveryQueue,
    pending: &PendingFiles,
    availability: &AvailabilityState,
    diagnostics: &Diagnostics,
) -> HealthReport {
    HealthReport {
        flags: availability.get(),
        free: pool.free_len(),
        full: pool.full_len(),
        uplink: uplink.len(),
        storage: storage.len(),
        catalog: pending.queued(),
        capacity: pool.capacity(),
        counters: diagnostics.snapshot(),
    }
}
