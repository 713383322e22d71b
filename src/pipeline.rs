//! Wires every stage onto its own named thread.
//!
//! ```text
//! trigger -> readers -> aggregator -> full queue -> router -+-> uplink -----> collector
//!                                        ^                  |      | fallback
//!                                        |                  +-> writer ----> storage
//!                                        +---- replay <---- catalog <--------+
//! ```
//!
//! There is no shutdown path: stages run for the life of the process.

use log::{info, warn};
use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
};

use crate::acquisition::{
    aggregator::SampleAggregator,
    clock::Clock,
    sensor::{spawn_sensor_reader, SampleChannel, SensorDriver},
    trigger::{PeriodicTrigger, TriggerHandle},
};
use crate::availability::{AvailabilityState, HardwareFlags};
use crate::buffer::pool::BufferPool;
use crate::config::DataloggerConfig;
use crate::delivery::{
    catalog::{PendingFiles, StorageCatalog},
    monitor::spawn_presence_monitor,
    queue::DeliveryQueue,
    replay::ReplayLoader,
    router::{health_report, Router},
    storage::Storage,
    transport::Transport,
    uplink::UplinkWorker,
    writer::StorageWriter,
};
use crate::error::{DataloggerError, Result};
use crate::utils::diagnostics::{Diagnostics, HealthReport};

/// External collaborators the pipeline drives.
pub struct Services {
    pub transport: Arc<dyn Transport>,
    pub storage: Arc<dyn Storage>,
    pub clock: Arc<dyn Clock>,
}

pub struct Pipeline {
    pool: BufferPool,
    availability: Arc<AvailabilityState>,
    diagnostics: Arc<Diagnostics>,
    uplink: Arc<DeliveryQueue>,
    storage: Arc<DeliveryQueue>,
    pending: Arc<PendingFiles>,
    trigger: Option<TriggerHandle>,
    handles: Vec<JoinHandle<()>>,
}

impl Pipeline {
    /// Starts trigger and one reader per driver, then the rest of the
    /// pipeline on their record queues. If a later stage fails to start,
    /// the dropped trigger handle stops sampling and the readers exit.
    pub fn start(
        config: &DataloggerConfig,
        drivers: Vec<Box<dyn SensorDriver>>,
        services: Services,
    ) -> Result<Self> {
        config.validate()?;
        let diagnostics = Arc::new(Diagnostics::new());
        let mut trigger = PeriodicTrigger::new(config.sample_period()).pin_to_core(config.trigger.pin_core);

        let mut channels: Vec<Box<dyn SampleChannel>> = Vec::with_capacity(drivers.len());
        let mut handles = Vec::with_capacity(drivers.len() + 8);
        for driver in drivers {
            let reader = spawn_sensor_reader(driver, trigger.subscribe(), config.trigger.record_queue_depth)?;
            channels.push(Box::new(reader.channel));
            handles.push(reader.handle);
        }
        let trigger = trigger.spawn(diagnostics.clone())?;

        let mut pipeline = Self::start_stages(config, channels, services, diagnostics)?;
        pipeline.trigger = Some(trigger);
        pipeline.handles.extend(handles);
        Ok(pipeline)
    }

    /// Starts everything downstream of the sample channels.
    pub fn start_with_channels(
        config: &DataloggerConfig,
        channels: Vec<Box<dyn SampleChannel>>,
        services: Services,
    ) -> Result<Self> {
        Self::start_stages(config, channels, services, Arc::new(Diagnostics::new()))
    }

    fn start_stages(
        config: &DataloggerConfig,
        channels: Vec<Box<dyn SampleChannel>>,
        services: Services,
        diagnostics: Arc<Diagnostics>,
    ) -> Result<Self> {
        config.validate()?;
        let layout = Arc::new(config.layout()?);
        info!(
            "[Pipeline] station {} | {} sensors | {} items @ {} Hz | {} bytes per buffer",
            config.station_id as char,
            layout.slots().len(),
            layout.items_per_sensor(),
            layout.sample_rate(),
            layout.max_buffer_size()
        );

        let pool = BufferPool::allocate(layout, config.pool_size)?;
        if pool.capacity() < config.pool_size {
            warn!(
                "[Pipeline] running degraded with {}/{} buffers",
                pool.capacity(),
                config.pool_size
            );
        }

        if let Some(path) = &config.diagnostics.event_log {
            diagnostics
                .start_log_consumer(path.clone())
                .map_err(DataloggerError::Config)?;
        }

        let availability = Arc::new(AvailabilityState::new());
        let uplink = Arc::new(DeliveryQueue::new("uplink", pool.capacity()));
        let storage_q = Arc::new(DeliveryQueue::new("storage", pool.capacity()));
        let pending = Arc::new(PendingFiles::new(config.storage.catalog_batch));
        let Services {
            transport,
            storage,
            clock,
        } = services;

        let aggregator = SampleAggregator::new(pool.clone(), channels, clock, diagnostics.clone())?;
        let router = Router::new(
            config,
            pool.clone(),
            uplink.clone(),
            storage_q.clone(),
            pending.clone(),
            availability.clone(),
            diagnostics.clone(),
        );
        let uplink_worker = UplinkWorker::new(
            &config.uplink,
            uplink.clone(),
            storage_q.clone(),
            pool.clone(),
            transport.clone(),
            availability.clone(),
            diagnostics.clone(),
        );
        let writer = StorageWriter::new(
            storage_q.clone(),
            pool.clone(),
            storage.clone(),
            availability.clone(),
            diagnostics.clone(),
            config.storage.probe_interval(),
        );
        let catalog = StorageCatalog::new(
            storage.clone(),
            pending.clone(),
            availability.clone(),
            diagnostics.clone(),
            config.storage.catalog_batch,
            config.storage.catalog_interval(),
        );
        let replay = ReplayLoader::new(
            pending.clone(),
            pool.clone(),
            storage.clone(),
            availability.clone(),
            diagnostics.clone(),
        );

        // ====================================================================
        // Presence monitors first, so routing sees real flags early
        // ====================================================================
        let mut handles = vec![
            spawn_presence_monitor(
                "transport",
                move || transport.probe(),
                HardwareFlags::TRANSPORT_CONNECTED,
                config.uplink.probe_interval(),
                availability.clone(),
            )?,
            spawn_presence_monitor(
                "storage",
                move || storage.is_mounted(),
                HardwareFlags::STORAGE_MOUNTED,
                config.storage.probe_interval(),
                availability.clone(),
            )?,
        ];

        handles.push(spawn_stage("aggregator", move || aggregator.run())?);
        handles.push(spawn_stage("router", move || router.run())?);
        handles.push(spawn_stage("uplink", move || uplink_worker.run())?);
        handles.push(spawn_stage("storage_writer", move || writer.run())?);
        handles.push(spawn_stage("storage_catalog", move || catalog.run())?);
        handles.push(spawn_stage("replay_loader", move || replay.run())?);

        info!("[Pipeline] {} stage threads running", handles.len());

        Ok(Self {
            pool,
            availability,
            diagnostics,
            uplink,
            storage: storage_q,
            pending,
            trigger: None,
            handles,
        })
    }

    pub fn availability(&self) -> &Arc<AvailabilityState> {
        &self.availability
    }

    pub fn diagnostics(&self) -> &Arc<Diagnostics> {
        &self.diagnostics
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn report(&self) -> HealthReport {
        health_report(
            &self.pool,
            &self.uplink,
            &self.storage,
            &self.pending,
            &self.availability,
            &self.diagnostics,
        )
    }

    /// Stops the sampling trigger; readers and the aggregator wind down once
    /// their queues drain. Delivery stages keep running.
    pub fn stop_acquisition(&mut self) {
        if let Some(trigger) = self.trigger.take() {
            trigger.stop();
        }
    }

    pub fn thread_count(&self) -> usize {
        self.handles.len()
    }
}

fn spawn_stage<F>(name: &str, body: F) -> io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new().name(name.to_string()).spawn(body)
}
