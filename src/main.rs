//! # Field datalogger entry point
//!
//! Loads the configuration, builds the collaborators (simulated sensor
//! drivers, directory storage, HTTP uplink, system clock) and runs the
//! pipeline. Without `--duration-secs` the process runs until killed.
//!
//! ## Outputs
//! - Buffers posted to `[uplink] endpoint`, or persisted under
//!   `[storage] directory` until the uplink comes back.
//! - Optional CSV event log at `[diagnostics] event_log`.

use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};
use std::{path::PathBuf, process, sync::Arc, thread, time::Duration};

use field_datalogger::{
    acquisition::{
        clock::SystemClock,
        sensor::{SensorDriver, SimulatedSensor},
    },
    delivery::{
        storage::DirStorage,
        transport::{HttpTransport, OfflineTransport, Transport},
    },
    DataloggerConfig, Pipeline, Result, Services,
};

#[derive(Parser, Debug)]
#[command(name = "field_datalogger", version, about = "Multi-sensor store-and-forward datalogger")]
struct Args {
    /// TOML configuration file; built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds instead of running forever.
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Print the buffer layout and exit.
    #[arg(long)]
    print_layout: bool,
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        error!("{}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            DataloggerConfig::load(path)?
        }
        None => {
            let config = DataloggerConfig::default();
            config.validate()?;
            config
        }
    };

    if args.print_layout {
        print_layout(&config)?;
        return Ok(());
    }

    info!("=== DATALOGGER START ===");

    let drivers: Vec<Box<dyn SensorDriver>> = config
        .sources
        .iter()
        .map(|s| Box::new(SimulatedSensor::from_source(s)) as Box<dyn SensorDriver>)
        .collect();

    let transport: Arc<dyn Transport> = match &config.uplink.endpoint {
        Some(endpoint) => Arc::new(HttpTransport::from_config(&config.uplink, endpoint)?),
        None => {
            warn!("No uplink endpoint configured, buffers go to storage only");
            Arc::new(OfflineTransport)
        }
    };
    let storage = DirStorage::create(&config.storage.directory)?;
    info!("Storage directory: {}", storage.root().display());

    let services = Services {
        transport,
        storage: Arc::new(storage),
        clock: Arc::new(SystemClock),
    };
    let mut pipeline = Pipeline::start(&config, drivers, services)?;

    match args.duration_secs {
        Some(secs) => {
            thread::sleep(Duration::from_secs(secs));
            pipeline.stop_acquisition();
            info!("[Pipeline] {}", pipeline.report());
            pipeline.diagnostics().stop_consumer();
            info!("=== DATALOGGER FINISHED ===");
            Ok(())
        }
        None => loop {
            thread::park();
        },
    }
}

fn print_layout(config: &DataloggerConfig) -> Result<()> {
    let layout = config.layout()?;
    println!("station        : {}", config.station_id as char);
    println!("items/sensor   : {}", layout.items_per_sensor());
    println!("sample rate    : {} Hz", layout.sample_rate());
    println!("bytes per tick : {}", layout.bytes_per_tick());
    println!("buffer size    : {} bytes", layout.max_buffer_size());
    println!("pool           : {} buffers", config.pool_size);
    println!();
    println!("{:>6} {:>6} {:>8} {:>8}", "sensor", "width", "id@", "data@");
    for slot in layout.slots() {
        println!(
            "{:>6} {:>6} {:>8} {:>8}",
            slot.id,
            slot.bytes_per_item,
            slot.offset - 1,
            slot.offset
        );
    }
    Ok(())
}
