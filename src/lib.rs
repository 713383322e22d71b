//! # Field datalogger
//!
//! Multi-sensor acquisition with store-and-forward delivery. A periodic
//! trigger paces sensor readers; the aggregator packs one record per tick
//! from every source into fixed-size buffers drawn from a small pool; the
//! router sends each full buffer to the HTTP uplink when connected, or to
//! local storage otherwise, and persisted buffers are replayed once the
//! uplink returns. No buffer is ever dropped: when neither path is usable it
//! waits in the full queue.
//!
//! ## Concurrency
//! - Buffers move between stages by value through bounded queues, so each
//!   one has exactly one owner at a time.
//! - Shared hardware state is a single flag word (`AvailabilityState`) whose
//!   exclusivity tokens are held through RAII guards.
//! - The sampling trigger only does non-blocking sends.

pub mod acquisition;
pub mod availability;
pub mod buffer;
pub mod config;
pub mod delivery;
pub mod error;
pub mod pipeline;
pub mod utils;

pub use availability::{AvailabilityState, HardwareFlags};
pub use buffer::{pool::BufferPool, Provenance, SampleBuffer, Timestamp};
pub use config::DataloggerConfig;
pub use error::{DataloggerError, Result};
pub use pipeline::{Pipeline, Services};
