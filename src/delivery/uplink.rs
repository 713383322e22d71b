//! Uplink worker: posts full buffers to the collector.
//!
//! A failed send goes back to the front of the uplink queue and counts an
//! attempt on the buffer. After `max_retries` failed re-sends the buffer
//! falls back to storage when it is mounted, otherwise it keeps its place at
//! the front and is retried indefinitely.

use log::{debug, info, warn};
use std::{sync::Arc, thread, time::Duration};

use crate::availability::{AvailabilityState, Resource};
use crate::buffer::{pool::BufferPool, SampleBuffer};
use crate::config::UplinkConfig;
use crate::delivery::{queue::DeliveryQueue, transport::Transport};
use crate::utils::diagnostics::{Diagnostics, EventKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UplinkOutcome {
    Delivered,
    /// Re-queued at the front; carries the attempts so far.
    Retrying(u32),
    FellBackToStorage,
    /// Out of retries with no storage; re-queued at the front.
    Parked,
}

pub struct UplinkWorker {
    queue: Arc<DeliveryQueue>,
    storage_queue: Arc<DeliveryQueue>,
    pool: BufferPool,
    transport: Arc<dyn Transport>,
    availability: Arc<AvailabilityState>,
    diagnostics: Arc<Diagnostics>,
    max_retries: u32,
    backoff: Duration,
}

impl UplinkWorker {
    pub fn new(
        config: &UplinkConfig,
        queue: Arc<DeliveryQueue>,
        storage_queue: Arc<DeliveryQueue>,
        pool: BufferPool,
        transport: Arc<dyn Transport>,
        availability: Arc<AvailabilityState>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            queue,
            storage_queue,
            pool,
            transport,
            availability,
            diagnostics,
            max_retries: config.max_retries,
            backoff: config.retry_backoff(),
        }
    }

    /// One delivery attempt for `buf`. Transport exclusivity is held only
    /// around the send.
    pub fn deliver(&self, mut buf: SampleBuffer) -> UplinkOutcome {
        let sent = {
            let _guard = self.availability.acquire(Resource::Transport);
            self.transport.send(buf.payload())
        };
        let (id, stamp) = (buf.id(), buf.timestamp());

        match sent {
            Ok(()) => {
                debug!("[Uplink] buffer {} ({}) delivered", id, stamp);
                self.diagnostics.record(EventKind::Delivered, Some(id), Some(stamp));
                self.pool.release_empty(buf);
                UplinkOutcome::Delivered
            }
            Err(e) if buf.attempts() < self.max_retries => {
                buf.record_attempt();
                let attempts = buf.attempts();
                warn!("[Uplink] buffer {} send failed ({}), retry {}/{}", id, e, attempts, self.max_retries);
                self.diagnostics.record(EventKind::RetryScheduled, Some(id), Some(stamp));
                self.queue.push_front(buf);
                UplinkOutcome::Retrying(attempts)
            }
            Err(e) if self.availability.storage_mounted() => {
                warn!("[Uplink] buffer {} gave up after {} retries ({}), persisting", id, self.max_retries, e);
                buf.reset_attempts();
                self.diagnostics.record(EventKind::FellBackToStorage, Some(id), Some(stamp));
                self.storage_queue.push_back(buf);
                UplinkOutcome::FellBackToStorage
            }
            Err(e) => {
                warn!("[Uplink] buffer {} undeliverable and storage unavailable ({}), holding", id, e);
                self.queue.push_front(buf);
                UplinkOutcome::Parked
            }
        }
    }

    /// Takes the next queued buffer and tries it once; backs off after a
    /// failure, outside of transport exclusivity.
    pub fn step(&self) -> UplinkOutcome {
        let buf = self.queue.pop();
        let outcome = self.deliver(buf);
        if matches!(outcome, UplinkOutcome::Retrying(_) | UplinkOutcome::Parked) {
            thread::sleep(self.backoff);
        }
        outcome
    }

    pub fn run(self) {
        info!("[Uplink] started, max retries {}", self.max_retries);
        loop {
            self.step();
        }
    }
}
