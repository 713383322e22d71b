//! Presence monitors: poll a collaborator and mirror the answer into a
//! presence flag (`TRANSPORT_CONNECTED`, `STORAGE_MOUNTED`).

use log::{info, warn};
use std::{
    io,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::availability::{AvailabilityState, HardwareFlags};

/// Applies one probe result; returns whether the flag changed.
pub fn apply_probe(
    name: &str,
    present: bool,
    flag: HardwareFlags,
    availability: &AvailabilityState,
) -> bool {
    let changed = availability.assign(flag, present);
    if changed {
        if present {
            info!("[Monitor] {} up", name);
        } else {
            warn!("[Monitor] {} down", name);
        }
    }
    changed
}

/// Probes every `interval` forever.
pub fn spawn_presence_monitor<P>(
    name: &'static str,
    mut probe: P,
    flag: HardwareFlags,
    interval: Duration,
    availability: Arc<AvailabilityState>,
) -> io::Result<JoinHandle<()>>
where
    P: FnMut() -> bool + Send + 'static,
{
    thread::Builder::new()
        .name(format!("monitor_{}", name))
        .spawn(move || loop {
            apply_probe(name, probe(), flag, &availability);
            thread::sleep(interval);
        })
}
