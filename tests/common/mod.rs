#![allow(dead_code)]

use crossbeam::channel::{bounded, Sender};
use field_datalogger::{
    acquisition::{
        clock::Clock,
        sensor::{QueuedChannel, SampleChannel},
    },
    config::{SensorConfig, SourceConfig},
    delivery::{
        storage::{DirStorage, Storage, Written},
        transport::Transport,
    },
    error::TransportError,
    DataloggerConfig, Timestamp,
};
use parking_lot::Mutex;
use std::{
    io,
    path::Path,
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    thread,
    time::{Duration, Instant},
};

/// Two sources (3 B and 2x2 B), four items per sensor, fast timings.
pub fn small_config(storage_dir: &Path) -> DataloggerConfig {
    let mut config = DataloggerConfig {
        items_per_sensor: 4,
        pool_size: 3,
        sources: vec![
            SourceConfig {
                name: "geo".into(),
                sensors: vec![SensorConfig { id: 0, bytes_per_item: 3 }],
            },
            SourceConfig {
                name: "accel".into(),
                sensors: vec![
                    SensorConfig { id: 1, bytes_per_item: 2 },
                    SensorConfig { id: 2, bytes_per_item: 2 },
                ],
            },
        ],
        ..DataloggerConfig::default()
    };
    config.uplink.probe_interval_ms = 5;
    config.uplink.retry_backoff_ms = 1;
    config.storage.directory = storage_dir.to_path_buf();
    config.storage.probe_interval_ms = 5;
    config.storage.catalog_interval_ms = 10;
    config.diagnostics.router_wait_ms = 10;
    config
}

/// Record channels fed by the test, one per configured source.
pub struct Feeder {
    senders: Vec<(Sender<Vec<u8>>, usize)>,
    items: usize,
    fills: u8,
}

impl Feeder {
    pub fn new(config: &DataloggerConfig) -> (Self, Vec<Box<dyn SampleChannel>>) {
        let mut senders = Vec::new();
        let mut channels: Vec<Box<dyn SampleChannel>> = Vec::new();
        for (source, width) in config.sources.iter().zip(config.source_widths()) {
            let (tx, rx) = bounded(1024);
            senders.push((tx, width));
            channels.push(Box::new(QueuedChannel::new(&source.name, width, rx)));
        }
        let feeder = Self {
            senders,
            items: config.items_per_sensor as usize,
            fills: 0,
        };
        (feeder, channels)
    }

    /// Pushes exactly one buffer's worth of records. Every byte of fill `n`
    /// is `n + 1`.
    pub fn feed_buffer(&mut self) {
        self.fills += 1;
        for _ in 0..self.items {
            for (tx, width) in &self.senders {
                tx.send(vec![self.fills; *width]).unwrap();
            }
        }
    }
}

/// Each call returns the next second.
pub struct SequenceClock(AtomicU64);

impl SequenceClock {
    pub fn new() -> Self {
        Self(AtomicU64::new(240101000000))
    }
}

impl Clock for SequenceClock {
    fn now(&self) -> Timestamp {
        let n = self.0.fetch_add(1, Ordering::SeqCst);
        Timestamp::parse(&format!("{:012}", n)).unwrap()
    }
}

/// Transport whose reachability and failures the test controls.
#[derive(Default)]
pub struct FakeTransport {
    pub connected: AtomicBool,
    pub failing: AtomicBool,
    pub attempts: AtomicUsize,
    pub received: Mutex<Vec<Vec<u8>>>,
}

impl FakeTransport {
    pub fn connected() -> Self {
        let t = Self::default();
        t.connected.store(true, Ordering::SeqCst);
        t
    }

    pub fn received_count(&self) -> usize {
        self.received.lock().len()
    }
}

impl Transport for FakeTransport {
    fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.connected.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Status(503));
        }
        self.received.lock().push(payload.to_vec());
        Ok(())
    }

    fn probe(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Directory storage with a removable "card".
pub struct CardStorage {
    pub inner: DirStorage,
    pub inserted: AtomicBool,
    /// Pulls the card during the next read.
    pub pull_on_read: AtomicBool,
    pub reads: AtomicUsize,
}

impl CardStorage {
    pub fn new(root: &Path, inserted: bool) -> Self {
        Self {
            inner: DirStorage::new(root),
            inserted: AtomicBool::new(inserted),
            pull_on_read: AtomicBool::new(false),
            reads: AtomicUsize::new(0),
        }
    }

    fn check(&self) -> io::Result<()> {
        if self.inserted.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(io::Error::new(io::ErrorKind::NotConnected, "card removed"))
        }
    }
}

impl Storage for CardStorage {
    fn is_mounted(&self) -> bool {
        self.inserted.load(Ordering::SeqCst) && self.inner.is_mounted()
    }

    fn list(&self, offset: usize, limit: usize) -> io::Result<Vec<String>> {
        self.check()?;
        self.inner.list(offset, limit)
    }

    fn write(&self, name: &str, bytes: &[u8]) -> io::Result<Written> {
        self.check()?;
        self.inner.write(name, bytes)
    }

    fn read(&self, name: &str, out: &mut [u8]) -> io::Result<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.pull_on_read.swap(false, Ordering::SeqCst) {
            self.inserted.store(false, Ordering::SeqCst);
        }
        self.check()?;
        self.inner.read(name, out)
    }

    fn delete(&self, name: &str) -> io::Result<()> {
        self.check()?;
        self.inner.delete(name)
    }
}

/// Polls `cond` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}
