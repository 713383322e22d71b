//! Replay of persisted buffers.
//!
//! While the transport is up, takes one catalog name at a time, loads the
//! file into a free buffer, deletes the file and hands the buffer back to
//! the Router as `Replayed`. The free buffer is taken before storage
//! exclusivity so the loader never sits on the storage token while the
//! writer (which needs that token to free a buffer) waits for it.

use log::{error, info, warn};
use std::{io, sync::Arc};

use crate::availability::{AvailabilityState, HardwareFlags, Resource};
use crate::buffer::{pool::BufferPool, Provenance};
use crate::delivery::{catalog::PendingFiles, storage::Storage};
use crate::utils::diagnostics::{Diagnostics, EventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// Loaded into the buffer with this id and queued for routing.
    Replayed(usize),
    /// Unreadable or not a buffer of this unit; never retried.
    Rejected,
    /// Left on storage with `FILES_PENDING` raised again, so a later listing
    /// picks it up.
    Deferred,
}

pub struct ReplayLoader {
    pending: Arc<PendingFiles>,
    pool: BufferPool,
    storage: Arc<dyn Storage>,
    availability: Arc<AvailabilityState>,
    diagnostics: Arc<Diagnostics>,
}

impl ReplayLoader {
    pub fn new(
        pending: Arc<PendingFiles>,
        pool: BufferPool,
        storage: Arc<dyn Storage>,
        availability: Arc<AvailabilityState>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            pending,
            pool,
            storage,
            availability,
            diagnostics,
        }
    }

    pub fn replay_one(&self, name: &str) -> ReplayOutcome {
        let mut buf = self.pool.acquire_empty();
        let guard = self.availability.acquire(Resource::Storage);

        let loaded = self
            .storage
            .read(name, buf.payload_mut())
            .and_then(|()| {
                if self.pool.layout().header_matches(buf.payload()) {
                    Ok(())
                } else {
                    Err(io::Error::new(io::ErrorKind::InvalidData, "header does not match this unit"))
                }
            });

        if let Err(e) = loaded {
            let mounted = self.storage.is_mounted();
            drop(guard);
            buf.restore_header(self.pool.layout());
            self.pool.release_empty(buf);

            return match e.kind() {
                io::ErrorKind::NotFound => {
                    warn!("[Replay] {} vanished before replay", name);
                    self.pending.release(name);
                    ReplayOutcome::Deferred
                }
                _ if !mounted => {
                    warn!("[Replay] storage gone while reading {}: {}", name, e);
                    self.defer(name);
                    ReplayOutcome::Deferred
                }
                _ => {
                    error!("[Replay] {} rejected: {}", name, e);
                    self.pending.reject(name);
                    self.diagnostics.record(EventKind::ReplayRejected, None, None);
                    ReplayOutcome::Rejected
                }
            };
        }

        // At most one replay per file: a file that cannot be deleted is not
        // replayed now.
        if let Err(e) = self.storage.delete(name) {
            self.pending.release(name);
            guard.release_with(HardwareFlags::FILES_PENDING);
            error!("[Replay] cannot delete {}: {}", name, e);
            self.diagnostics.record(EventKind::StorageError, Some(buf.id()), Some(buf.timestamp()));
            buf.restore_header(self.pool.layout());
            self.pool.release_empty(buf);
            return ReplayOutcome::Deferred;
        }
        drop(guard);
        self.pending.release(name);

        buf.set_provenance(Provenance::Replayed);
        buf.reset_attempts();
        let id = buf.id();
        self.diagnostics.record(EventKind::Replayed, Some(id), Some(buf.timestamp()));
        self.pool.enqueue_full(buf);
        ReplayOutcome::Replayed(id)
    }

    /// Gives `name` back to the catalog; the file is still on storage.
    fn defer(&self, name: &str) {
        self.pending.release(name);
        self.availability.set(HardwareFlags::FILES_PENDING);
    }

    /// Waits for the transport, then replays the next catalog name.
    pub fn step(&self) -> ReplayOutcome {
        self.availability
            .wait_until(HardwareFlags::TRANSPORT_CONNECTED, true);
        let name = self.pending.next();
        self.replay_one(&name)
    }

    pub fn run(self) {
        info!("[Replay] started");
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
    use crate::delivery::{catalog::StorageCatalog, storage::{DirStorage, Written}};
    use std::fs;

    struct Fixture {
        loader: ReplayLoader,
        pool: BufferPool,
        storage: Arc<DirStorage>,
        pending: Arc<PendingFiles>,
        _dir: tempfile::TempDir,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let layout = BufferLayout::new(2, 100, b'A', &[SensorSpec { id: 4, bytes_per_item: 2 }]).unwrap();
        let pool = BufferPool::allocate(Arc::new(layout), 2).unwrap();
        let storage = Arc::new(DirStorage::new(dir.path()));
        let pending = Arc::new(PendingFiles::new(2));
        let loader = ReplayLoader::new(
            pending.clone(),
            pool.clone(),
            storage.clone(),
            Arc::new(AvailabilityState::new()),
            Arc::new(Diagnostics::new()),
        );
        Fixture {
            loader,
            pool,
            storage,
            pending,
            _dir: dir,
        }
    }

    #[test]
    fn replays_and_deletes_a_valid_file() {
        let f = fixture();
        let mut buf = f.pool.acquire_empty();
        buf.set_timestamp(&Timestamp::parse("240101101010").unwrap());
        buf.payload_mut()[19..23].copy_from_slice(&[1, 2, 3, 4]);
        let wire = buf.payload().to_vec();
        f.pool.release_empty(buf);
        f.storage.write("240101101010", &wire).unwrap();
        assert!(f.pending.publish("240101101010"));
        let name = f.pending.next();

        assert!(matches!(f.loader.replay_one(&name), ReplayOutcome::Replayed(_)));
        let back = f.pool.try_acquire_full().unwrap();
        assert_eq!(back.payload(), &wire[..]);
        assert_eq!(back.provenance(), Provenance::Replayed);
        assert!(f.storage.list(0, 5).unwrap().is_empty());
        assert!(!f.pending.is_tracked("240101101010"));
    }

    #[test]
    fn foreign_file_is_rejected_and_buffer_restored() {
        let f = fixture();
        let size = f.pool.layout().max_buffer_size();
        f.storage.write("240101000000", &vec![0xEE; size]).unwrap();
        f.pending.publish("240101000000");

        assert_eq!(f.loader.replay_one("240101000000"), ReplayOutcome::Rejected);
        assert!(f.pending.is_tracked("240101000000"));
        assert_eq!(f.pool.free_len(), 2);
        // file stays for inspection
        assert_eq!(f.storage.list(0, 5).unwrap().len(), 1);

        let buf = f.pool.acquire_empty();
        let other = f.pool.acquire_empty();
        for b in [&buf, &other] {
            assert!(f.pool.layout().header_matches(b.payload()));
        }
    }

    #[test]
    fn missing_file_is_deferred() {
        let f = fixture();
        f.pending.publish("240101000000");
        assert_eq!(f.loader.replay_one("240101000000"), ReplayOutcome::Deferred);
        assert!(!f.pending.is_tracked("240101000000"));
        assert_eq!(f.pool.free_len(), 2);
    }

    #[test]
    fn short_file_is_rejected() {
        let f = fixture();
        fs::write(f.storage.root().join("240101000001"), [1u8, 2, 3]).unwrap();
        assert_eq!(f.loader.replay_one("240101000001"), ReplayOutcome::Rejected);
        assert_eq!(f.pool.free_len(), 2);
    }

    /// Directory storage that cannot delete.
    struct ReadOnlyDelete(DirStorage);

    impl Storage for ReadOnlyDelete {
        fn is_mounted(&self) -> bool {
            self.0.is_mounted()
        }

        fn list(&self, offset: usize, limit: usize) -> io::Result<Vec<String>> {
            self.0.list(offset, limit)
        }

        fn write(&self, name: &str, bytes: &[u8]) -> io::Result<Written> {
            self.0.write(name, bytes)
        }

        fn read(&self, name: &str, out: &mut [u8]) -> io::Result<()> {
            self.0.read(name, out)
        }

        fn delete(&self, _name: &str) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "write protected"))
        }
    }

    #[test]
    fn undeletable_file_is_deferred_and_listed_again() {
        let dir = tempfile::tempdir().unwrap();
        let layout = BufferLayout::new(2, 100, b'A', &[SensorSpec { id: 4, bytes_per_item: 2 }]).unwrap();
        let pool = BufferPool::allocate(Arc::new(layout), 2).unwrap();
        let storage = Arc::new(ReadOnlyDelete(DirStorage::new(dir.path())));
        let pending = Arc::new(PendingFiles::new(2));
        let availability = Arc::new(AvailabilityState::new());
        availability.set(HardwareFlags::STORAGE_MOUNTED | HardwareFlags::FILES_PENDING);
        let diagnostics = Arc::new(Diagnostics::new());

        let mut buf = pool.acquire_empty();
        buf.set_timestamp(&Timestamp::parse("240101101010").unwrap());
        storage.write("240101101010", buf.payload()).unwrap();
        pool.release_empty(buf);

        let catalog = StorageCatalog::new(
            storage.clone(),
            pending.clone(),
            availability.clone(),
            diagnostics.clone(),
            2,
            std::time::Duration::from_millis(1),
        );
        let loader = ReplayLoader::new(pending.clone(), pool.clone(), storage.clone(), availability.clone(), diagnostics);

        assert_eq!(catalog.scan().unwrap(), 1);
        let name = pending.next();
        assert_eq!(loader.replay_one(&name), ReplayOutcome::Deferred);

        assert_eq!(storage.list(0, 5).unwrap(), vec![name.clone()]);
        assert!(availability.get().contains(HardwareFlags::FILES_PENDING | HardwareFlags::STORAGE_AVAILABLE));
        assert_eq!(pool.free_len(), 2);
        assert_eq!(pool.full_len(), 0);

        assert_eq!(catalog.scan().unwrap(), 1);
        assert_eq!(pending.next(), name);
    }
}
