//! Acquisition side: trigger, sensor readers and the buffer aggregator.

pub mod aggregator;
pub mod clock;
pub mod sensor;
pub mod trigger;
