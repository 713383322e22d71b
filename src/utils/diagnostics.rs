//! Pipeline diagnostics: lifecycle counters plus an optional CSV event log.
//!
//! Producers (every pipeline stage) call `record`, which bumps an atomic
//! counter and, when the log consumer runs, pushes onto a bounded lock-free
//! queue. Pushing never blocks; a full queue drops the event and counts it.
//! A background consumer drains the queue in batches and flushes to disk
//! every few batches to keep syscall jitter off the producers.

use std::{
    fmt,
    fs::{create_dir_all, File},
    io::BufWriter,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use crossbeam_queue::ArrayQueue;
use csv::Writer;
use log::{debug, error};
use parking_lot::Mutex;
use serde::Serialize;

use crate::availability::HardwareFlags;
use crate::buffer::Timestamp;

const LOG_CAPACITY: usize = 4096;
const CONSUMER_POLL_MS: u64 = 5;
const FLUSH_BATCHES: usize = 8;
const DRAIN_BATCH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Filled,
    RoutedUplink,
    RoutedStorage,
    Requeued,
    Delivered,
    RetryScheduled,
    FellBackToStorage,
    Persisted,
    StorageError,
    Replayed,
    ReplayRejected,
    Drained,
    CatalogPublished,
    TriggerOverrun,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Filled => "filled",
            EventKind::RoutedUplink => "routed_uplink",
            EventKind::RoutedStorage => "routed_storage",
            EventKind::Requeued => "requeued",
            EventKind::Delivered => "delivered",
            EventKind::RetryScheduled => "retry_scheduled",
            EventKind::FellBackToStorage => "fell_back_to_storage",
            EventKind::Persisted => "persisted",
            EventKind::StorageError => "storage_error",
            EventKind::Replayed => "replayed",
            EventKind::ReplayRejected => "replay_rejected",
            EventKind::Drained => "drained",
            EventKind::CatalogPublished => "catalog_published",
            EventKind::TriggerOverrun => "trigger_overrun",
        }
    }
}

#[derive(Debug, Clone)]
struct RawEvent {
    seq: u64,
    ts: Instant,
    kind: EventKind,
    buffer: Option<usize>,
    stamp: Option<Timestamp>,
}

#[derive(Debug, Serialize)]
struct CsvRow {
    seq: u64,
    ts_epoch_us: u64,
    age_us: u64,
    event: &'static str,
    buffer: Option<usize>,
    timestamp: Option<String>,
}

impl CsvRow {
    fn from_raw(raw: RawEvent) -> Self {
        let ts_epoch_us = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;
        Self {
            seq: raw.seq,
            ts_epoch_us,
            age_us: raw.ts.elapsed().as_micros() as u64,
            event: raw.kind.as_str(),
            buffer: raw.buffer,
            timestamp: raw.stamp.map(|t| t.file_name()),
        }
    }
}

#[derive(Default)]
struct Counters {
    filled: AtomicU64,
    delivered: AtomicU64,
    retries: AtomicU64,
    fallbacks: AtomicU64,
    persisted: AtomicU64,
    storage_errors: AtomicU64,
    replayed: AtomicU64,
    replay_rejected: AtomicU64,
    requeued: AtomicU64,
    drained: AtomicU64,
    published: AtomicU64,
    trigger_overruns: AtomicU64,
}

/// Point-in-time copy of the lifecycle counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub filled: u64,
    pub delivered: u64,
    pub retries: u64,
    pub fallbacks: u64,
    pub persisted: u64,
    pub storage_errors: u64,
    pub replayed: u64,
    pub replay_rejected: u64,
    pub requeued: u64,
    pub drained: u64,
    pub published: u64,
    pub trigger_overruns: u64,
    pub dropped_events: u64,
}

pub struct Diagnostics {
    counters: Counters,
    queue: Arc<ArrayQueue<RawEvent>>,
    dropped: Arc<AtomicU64>,
    seq: AtomicU64,
    logging: AtomicBool,
    consumer_running: Arc<AtomicBool>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            counters: Counters::default(),
            queue: Arc::new(ArrayQueue::new(LOG_CAPACITY)),
            dropped: Arc::new(AtomicU64::new(0)),
            seq: AtomicU64::new(1),
            logging: AtomicBool::new(false),
            consumer_running: Arc::new(AtomicBool::new(false)),
            consumer: Mutex::new(None),
        }
    }

    /// Records a lifecycle event. Never blocks.
    pub fn record(&self, kind: EventKind, buffer: Option<usize>, stamp: Option<Timestamp>) {
        let c = &self.counters;
        let counter = match kind {
            EventKind::Filled => Some(&c.filled),
            EventKind::Delivered => Some(&c.delivered),
            EventKind::RetryScheduled => Some(&c.retries),
            EventKind::FellBackToStorage => Some(&c.fallbacks),
            EventKind::Persisted => Some(&c.persisted),
            EventKind::StorageError => Some(&c.storage_errors),
            EventKind::Replayed => Some(&c.replayed),
            EventKind::ReplayRejected => Some(&c.replay_rejected),
            EventKind::Requeued => Some(&c.requeued),
            EventKind::Drained => Some(&c.drained),
            EventKind::CatalogPublished => Some(&c.published),
            EventKind::TriggerOverrun => Some(&c.trigger_overruns),
            EventKind::RoutedUplink | EventKind::RoutedStorage => None,
        };
        if let Some(counter) = counter {
            counter.fetch_add(1, Ordering::Relaxed);
        }

        if !self.logging.load(Ordering::Acquire) {
            return;
        }
        let raw = RawEvent {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            ts: Instant::now(),
            kind,
            buffer,
            stamp,
        };
        if self.queue.push(raw).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        let c = &self.counters;
        let load = |a: &AtomicU64| a.load(Ordering::Relaxed);
        CounterSnapshot {
            filled: load(&c.filled),
            delivered: load(&c.delivered),
            retries: load(&c.retries),
            fallbacks: load(&c.fallbacks),
            persisted: load(&c.persisted),
            storage_errors: load(&c.storage_errors),
            replayed: load(&c.replayed),
            replay_rejected: load(&c.replay_rejected),
            requeued: load(&c.requeued),
            drained: load(&c.drained),
            published: load(&c.published),
            trigger_overruns: load(&c.trigger_overruns),
            dropped_events: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Starts the background consumer writing events to `output_csv`.
    pub fn start_log_consumer(&self, output_csv: PathBuf) -> Result<(), String> {
        let mut slot = self.consumer.lock();
        if slot.is_some() {
            return Err("log consumer already running".into());
        }
        if let Some(dir) = output_csv.parent().filter(|d| !d.as_os_str().is_empty()) {
            create_dir_all(dir).map_err(|e| format!("cannot create {:?}: {}", dir, e))?;
        }
        let file = File::create(&output_csv)
            .map_err(|e| format!("cannot create {:?}: {}", output_csv, e))?;

        let queue = self.queue.clone();
        let dropped = self.dropped.clone();
        let running = self.consumer_running.clone();
        running.store(true, Ordering::SeqCst);
        self.logging.store(true, Ordering::Release);

        let handle = thread::Builder::new()
            .name("diagnostics_log".into())
            .spawn(move || {
                let mut wtr = Writer::from_writer(BufWriter::new(file));
                let mut flush_counter = 0usize;

                while running.load(Ordering::SeqCst) {
                    let mut any = false;
                    for _ in 0..DRAIN_BATCH {
                        match queue.pop() {
                            Some(raw) => {
                                any = true;
                                if let Err(e) = wtr.serialize(CsvRow::from_raw(raw)) {
                                    error!("[Diagnostics] csv write failed: {}", e);
                                }
                            }
                            None => break,
                        }
                    }
                    if any {
                        flush_counter += 1;
                        if flush_counter >= FLUSH_BATCHES {
                            wtr.flush().ok();
                            flush_counter = 0;
                        }
                    } else {
                        thread::sleep(Duration::from_millis(CONSUMER_POLL_MS));
                    }
                }

                while let Some(raw) = queue.pop() {
                    wtr.serialize(CsvRow::from_raw(raw)).ok();
                }
                wtr.flush().ok();
                debug!(
                    "[Diagnostics] consumer exiting, dropped_events={}",
                    dropped.load(Ordering::Relaxed)
                );
            })
            .map_err(|e| format!("cannot spawn log consumer: {}", e))?;

        *slot = Some(handle);
        Ok(())
    }

    /// Stops the consumer after a final drain. No-op when not running.
    pub fn stop_consumer(&self) {
        self.logging.store(false, Ordering::Release);
        self.consumer_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.consumer.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Diagnostics {
    fn drop(&mut self) {
        self.stop_consumer();
    }
}

/// Queue depths and flags sampled by the Router's periodic report.
#[derive(Debug, Clone, Copy)]
pub struct HealthReport {
    pub flags: HardwareFlags,
    pub free: usize,
    pub full: usize,
    pub uplink: usize,
    pub storage: usize,
    pub catalog: usize,
    pub capacity: usize,
    pub counters: CounterSnapshot,
}

impl HealthReport {
    /// Buffers not sitting in any queue: filling, in flight, or being replayed.
    pub fn in_flight(&self) -> usize {
        self.capacity
            .saturating_sub(self.free + self.full + self.uplink + self.storage)
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let on = |flag: HardwareFlags| if self.flags.contains(flag) { "up" } else { "down" };
        write!(
            f,
            "transport={} storage={} files_pending={} | free={}/{} full={} uplink={} storage_q={} catalog={} in_flight={} | filled={} delivered={} persisted={} replayed={} retries={} requeued={} storage_errors={}",
            on(HardwareFlags::TRANSPORT_CONNECTED),
            on(HardwareFlags::STORAGE_MOUNTED),
            self.flags.contains(HardwareFlags::FILES_PENDING),
            self.free,
            self.capacity,
            self.full,
            self.uplink,
            self.storage,
            self.catalog,
            self.in_flight(),
            self.counters.filled,
            self.counters.delivered,
            self.counters.persisted,
            self.counters.replayed,
            self.counters.retries,
            self.counters.requeued,
            self.counters.storage_errors,
        )
    }
}
