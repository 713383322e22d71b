//! Pending-file catalog.
//!
//! `StorageCatalog` lists persisted files in small batches and publishes
//! their names to a bounded catalog queue for the `ReplayLoader`. Names stay
//! tracked from publication until the loader is done with them, so a later
//! listing never publishes the same file twice.

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::{
    collections::HashSet,
    io,
    sync::Arc,
    thread,
    time::Duration,
};

use crate::availability::{AvailabilityState, HardwareFlags, Resource};
use crate::delivery::storage::Storage;
use crate::utils::diagnostics::{Diagnostics, EventKind};

#[derive(Default)]
struct Tracked {
    in_flight: HashSet<String>,
    rejected: HashSet<String>,
}

/// Catalog queue plus the names currently owned by the replay path.
pub struct PendingFiles {
    tx: Sender<String>,
    rx: Receiver<String>,
    tracked: Mutex<Tracked>,
}

impl PendingFiles {
    /// Queue depth is twice the listing batch.
    pub fn new(batch: usize) -> Self {
        let (tx, rx) = bounded(batch.max(1) * 2);
        Self {
            tx,
            rx,
            tracked: Mutex::new(Tracked::default()),
        }
    }

    /// Queues `name` for replay unless it is already tracked or the queue is
    /// full.
    pub fn publish(&self, name: &str) -> bool {
        let mut tracked = self.tracked.lock();
        if tracked.in_flight.contains(name) || tracked.rejected.contains(name) {
            return false;
        }
        match self.tx.try_send(name.to_string()) {
            Ok(()) => {
                tracked.in_flight.insert(name.to_string());
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Blocks for the next published name.
    pub fn next(&self) -> String {
        loop {
            if let Ok(name) = self.rx.recv() {
                return name;
            }
        }
    }

    pub fn next_timeout(&self, timeout: Duration) -> Option<String> {
        match self.rx.recv_timeout(timeout) {
            Ok(name) => Some(name),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Stops tracking `name`; a later listing may publish it again.
    pub fn release(&self, name: &str) {
        self.tracked.lock().in_flight.remove(name);
    }

    /// Never publishes `name` again in this process.
    pub fn reject(&self, name: &str) {
        let mut tracked = self.tracked.lock();
        tracked.in_flight.remove(name);
        tracked.rejected.insert(name.to_string());
    }

    pub fn is_tracked(&self, name: &str) -> bool {
        let tracked = self.tracked.lock();
        tracked.in_flight.contains(name) || tracked.rejected.contains(name)
    }

    /// Names published and not yet released or rejected.
    pub fn in_flight_len(&self) -> usize {
        self.tracked.lock().in_flight.len()
    }

    pub fn tracked_len(&self) -> usize {
        let tracked = self.tracked.lock();
        tracked.in_flight.len() + tracked.rejected.len()
    }

    /// Names waiting in the catalog queue.
    pub fn queued(&self) -> usize {
        self.rx.len()
    }
}

pub struct StorageCatalog {
    storage: Arc<dyn Storage>,
    pending: Arc<PendingFiles>,
    availability: Arc<AvailabilityState>,
    diagnostics: Arc<Diagnostics>,
    batch: usize,
    interval: Duration,
}

impl StorageCatalog {
    pub fn new(
        storage: Arc<dyn Storage>,
        pending: Arc<PendingFiles>,
        availability: Arc<AvailabilityState>,
        diagnostics: Arc<Diagnostics>,
        batch: usize,
        interval: Duration,
    ) -> Self {
        Self {
            storage,
            pending,
            availability,
            diagnostics,
            batch: batch.max(1),
            interval,
        }
    }

    /// One listing pass. Publishes up to `batch` untracked names. Clears
    /// `FILES_PENDING` only when the listing is exhausted and the replay path
    /// holds no name, since an in-flight name may still be deferred back.
    pub fn scan(&self) -> io::Result<usize> {
        let _guard = self.availability.acquire(Resource::Storage);
        if !self.storage.is_mounted() {
            return Ok(0);
        }

        // Tracked names come back in the listing too; ask for enough to see
        // `batch` new ones past them.
        let limit = self.batch + self.pending.tracked_len();
        let listed = self.storage.list(0, limit)?;
        let exhausted = listed.len() < limit;

        let mut published = 0;
        let mut backlog = false;
        for name in listed.iter().filter(|n| !self.pending.is_tracked(n)) {
            if published == self.batch {
                backlog = true;
                break;
            }
            if self.pending.publish(name) {
                published += 1;
                self.diagnostics.record(EventKind::CatalogPublished, None, None);
            } else {
                backlog = true;
                break;
            }
        }

        // Still under the guard, so a concurrent write cannot slip its
        // FILES_PENDING in before this clear.
        if exhausted && !backlog && self.pending.in_flight_len() == 0 {
            self.availability.clear(HardwareFlags::FILES_PENDING);
            debug!("[Catalog] storage exhausted, nothing in flight");
        }
        Ok(published)
    }

    pub fn run(self) {
        // Files may be left over from a previous run.
        self.availability.set(HardwareFlags::FILES_PENDING);
        info!("[Catalog] started, batch {}", self.batch);

        loop {
            self.availability.wait_until(
                HardwareFlags::FILES_PENDING
                    | HardwareFlags::TRANSPORT_CONNECTED
                    | HardwareFlags::STORAGE_MOUNTED,
                true,
            );
            match self.scan() {
                Ok(0) => {}
                Ok(n) => info!("[Catalog] {} files queued for replay", n),
                Err(e) => warn!("[Catalog] listing failed: {}", e),
            }
            thread::sleep(self.interval);
        }
    }
}
