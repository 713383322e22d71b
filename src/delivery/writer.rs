//! Storage writer: persists full buffers that could not go out.

use log::{debug, error, info, warn};
use std::{sync::Arc, thread, time::Duration};

use crate::availability::{AvailabilityState, HardwareFlags, Resource};
use crate::buffer::{pool::BufferPool, SampleBuffer};
use crate::delivery::{
    queue::DeliveryQueue,
    storage::{Storage, Written},
};
use crate::utils::diagnostics::{Diagnostics, EventKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Written under this file name; the buffer is free again.
    Persisted(String),
    /// Write failed; the buffer went back to the full queue.
    Rerouted,
}

pub struct StorageWriter {
    queue: Arc<DeliveryQueue>,
    pool: BufferPool,
    storage: Arc<dyn Storage>,
    availability: Arc<AvailabilityState>,
    diagnostics: Arc<Diagnostics>,
    error_backoff: Duration,
}

impl StorageWriter {
    pub fn new(
        queue: Arc<DeliveryQueue>,
        pool: BufferPool,
        storage: Arc<dyn Storage>,
        availability: Arc<AvailabilityState>,
        diagnostics: Arc<Diagnostics>,
        error_backoff: Duration,
    ) -> Self {
        Self {
            queue,
            pool,
            storage,
            availability,
            diagnostics,
            error_backoff,
        }
    }

    /// Writes the wire bytes of `buf` to a file named by its timestamp.
    pub fn persist(&self, buf: SampleBuffer) -> WriteOutcome {
        let guard = self.availability.acquire(Resource::Storage);
        let stamp = buf.timestamp();
        let name = stamp.file_name();

        match self.storage.write(&name, buf.payload()) {
            Ok(written) => {
                guard.release_with(HardwareFlags::FILES_PENDING);
                if written == Written::Replaced {
                    // Same timestamp second as an unreplayed file: the older
                    // buffer is gone.
                    warn!("[Writer] {} replaced an unreplayed file", name);
                    self.diagnostics.record(EventKind::StorageError, Some(buf.id()), Some(stamp));
                }
                debug!("[Writer] buffer {} persisted as {}", buf.id(), name);
                self.diagnostics.record(EventKind::Persisted, Some(buf.id()), Some(stamp));
                self.pool.release_empty(buf);
                WriteOutcome::Persisted(name)
            }
            Err(e) => {
                drop(guard);
                error!("[Writer] writing {} failed: {}", name, e);
                self.diagnostics.record(EventKind::StorageError, Some(buf.id()), Some(stamp));
                self.pool.enqueue_full(buf);
                WriteOutcome::Rerouted
            }
        }
    }

    pub fn step(&self) -> WriteOutcome {
        let buf = self.queue.pop();
        let outcome = self.persist(buf);
        if outcome == WriteOutcome::Rerouted {
            thread::sleep(self.error_backoff);
        }
        outcome
    }

    pub fn run(self) {
        info!("[Writer] started");
        loop {
            self.step();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{
        layout::{BufferLayout, SensorSpec},
        Timestamp,
    };
    use crate::delivery::storage::DirStorage;

    fn setup(
        root: &std::path::Path,
    ) -> (StorageWriter, BufferPool, Arc<AvailabilityState>, Arc<DeliveryQueue>, Arc<Diagnostics>) {
        let layout = BufferLayout::new(2, 100, b'A', &[SensorSpec { id: 0, bytes_per_item: 1 }]).unwrap();
        let pool = BufferPool::allocate(Arc::new(layout), 2).unwrap();
        let availability = Arc::new(AvailabilityState::new());
        let queue = Arc::new(DeliveryQueue::new("storage", 2));
        let diagnostics = Arc::new(Diagnostics::new());
        let writer = StorageWriter::new(
            queue.clone(),
            pool.clone(),
            Arc::new(DirStorage::new(root)),
            availability.clone(),
            diagnostics.clone(),
            Duration::ZERO,
        );
        (writer, pool, availability, queue, diagnostics)
    }

    #[test]
    fn persists_under_the_timestamp_and_flags_pending() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, pool, availability, queue, _) = setup(dir.path());
        let mut buf = pool.acquire_empty();
        buf.set_timestamp(&Timestamp::parse("240315081500").unwrap());
        let wire = buf.payload().to_vec();
        queue.push_back(buf);

        assert_eq!(writer.step(), WriteOutcome::Persisted("240315081500".into()));
        assert_eq!(std::fs::read(dir.path().join("240315081500")).unwrap(), wire);
        assert_eq!(pool.free_len(), 2);
        let flags = availability.get();
        assert!(flags.contains(HardwareFlags::FILES_PENDING | HardwareFlags::STORAGE_AVAILABLE));
    }

    #[test]
    fn failed_write_keeps_the_buffer() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, pool, availability, queue, _) = setup(&dir.path().join("absent"));
        let buf = pool.acquire_empty();
        let id = buf.id();
        queue.push_back(buf);

        assert_eq!(writer.step(), WriteOutcome::Rerouted);
        assert_eq!(pool.try_acquire_full().map(|b| b.id()), Some(id));
        let flags = availability.get();
        assert!(!flags.contains(HardwareFlags::FILES_PENDING));
        assert!(flags.contains(HardwareFlags::STORAGE_AVAILABLE));
    }

    #[test]
    fn same_second_overwrite_is_counted() {
        let dir = tempfile::tempdir().unwrap();
        let (writer, pool, _, queue, diagnostics) = setup(dir.path());
        let stamp = Timestamp::parse("240315081500").unwrap();

        for fill in [1u8, 2] {
            let mut buf = pool.acquire_empty();
            buf.set_timestamp(&stamp);
            buf.payload_mut()[19] = fill;
            queue.push_back(buf);
            assert_eq!(writer.step(), WriteOutcome::Persisted("240315081500".into()));
        }

        let counters = diagnostics.snapshot();
        assert_eq!(counters.persisted, 2);
        assert_eq!(counters.storage_errors, 1);
        assert_eq!(std::fs::read(dir.path().join("240315081500")).unwrap()[19], 2);
    }
}
