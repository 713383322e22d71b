//! Periodic sampling trigger.
//!
//! One high-priority thread releases a tick every sample period on an
//! absolute schedule (`next += period`), so late wake-ups do not accumulate
//! drift. Each subscriber gets its own small bounded tick queue; a tick that
//! finds the queue full is dropped and counted as an overrun instead of
//! stalling the trigger.

use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, error, info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};
use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::utils::diagnostics::{Diagnostics, EventKind};

/// Ticks a subscriber may fall behind before overruns are counted.
pub const TICK_BACKLOG: usize = 4;

pub struct TickSubscriber {
    rx: Receiver<Instant>,
}

impl TickSubscriber {
    /// Blocks for the next tick; `None` once the trigger has stopped.
    pub fn wait(&self) -> Option<Instant> {
        self.rx.recv().ok()
    }

    pub fn wait_timeout(&self, timeout: Duration) -> Option<Instant> {
        match self.rx.recv_timeout(timeout) {
            Ok(at) => Some(at),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

pub struct PeriodicTrigger {
    period: Duration,
    pin_core: Option<usize>,
    subscribers: Vec<Sender<Instant>>,
}

impl PeriodicTrigger {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            pin_core: None,
            subscribers: Vec::new(),
        }
    }

    pub fn with_rate(sample_rate: u16) -> Self {
        Self::new(Duration::from_nanos(1_000_000_000 / sample_rate.max(1) as u64))
    }

    pub fn pin_to_core(mut self, core: Option<usize>) -> Self {
        self.pin_core = core;
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn subscribe(&mut self) -> TickSubscriber {
        let (tx, rx) = bounded(TICK_BACKLOG);
        self.subscribers.push(tx);
        TickSubscriber { rx }
    }

    /// Starts the trigger thread at maximum OS priority (best effort).
    pub fn spawn(self, diagnostics: Arc<Diagnostics>) -> io::Result<TriggerHandle> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = thread::Builder::new()
            .name("sample_trigger".into())
            .spawn_with_priority(ThreadPriority::Max, move |priority| {
                if let Err(e) = priority {
                    warn!("[Trigger] running without elevated priority: {:?}", e);
                }
                if let Some(core) = self.pin_core {
                    pin_current_thread(core);
                }
                self.run(&flag, &diagnostics);
            })?;

        Ok(TriggerHandle {
            running,
            handle: Some(handle),
        })
    }

    fn run(mut self, running: &AtomicBool, diagnostics: &Diagnostics) {
        // ====================================================================
        // Absolute schedule: wait for the release, then fan out
        // ====================================================================
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        let mut next_release = Instant::now() + self.period;
        let mut ticks: u64 = 0;

        info!("[Trigger] started, period {:?}", self.period);

        while running.load(Ordering::Acquire) && !self.subscribers.is_empty() {
            let now = Instant::now();
            if now < next_release {
                sleeper.sleep(next_release - now);
            } else if now - next_release > self.period {
                debug!("[Trigger] late by {:?}", now - next_release);
            }

            let at = Instant::now();
            self.subscribers.retain(|tx| match tx.try_send(at) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    diagnostics.record(EventKind::TriggerOverrun, None, None);
                    true
                }
                Err(TrySendError::Disconnected(_)) => false,
            });

            next_release += self.period;
            ticks += 1;
        }

        info!("[Trigger] stopped after {} ticks", ticks);
    }
}

fn pin_current_thread(core: usize) {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    match core_ids.get(core) {
        Some(core_id) if core_affinity::set_for_current(*core_id) => {
            info!("[Trigger] pinned to core {}", core);
        }
        Some(_) => error!("[Trigger] failed to pin to core {}", core),
        None => error!("[Trigger] core {} not among available cores", core),
    }
}

pub struct TriggerHandle {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl TriggerHandle {
    /// Stops releasing ticks. Subscribers see `None` once drained.
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TriggerHandle {
    fn drop(&mut self) {
        self.halt();
    }
}
