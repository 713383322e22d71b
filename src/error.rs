//! Error types for the datalogger.
//!
//! `DataloggerError` covers startup and configuration problems that stop the
//! process. Runtime failures on the delivery path are recovered locally
//! (retry, fallback to storage, re-queue) and only ever surface as log lines,
//! so they get their own narrower types: `TransportError` for the uplink and
//! `AcquisitionError` for sample channels.

use std::io;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, DataloggerError>;

#[derive(Error, Debug)]
pub enum DataloggerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid buffer layout: {0}")]
    Layout(String),

    #[error("Failed to allocate buffer slot {slot} ({bytes} bytes)")]
    Allocation { slot: usize, bytes: usize },

    #[error("No sample buffer could be allocated")]
    NoBuffers,

    #[error("Sources produce {sources} bytes per tick but the layout expects {layout}")]
    WidthMismatch { sources: usize, layout: usize },

    #[error("Acquisition error: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Failure delivering a payload to the remote collector.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport is not connected")]
    Disconnected,

    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("collector answered with status {0}")]
    Status(u16),
}

/// Failure reading a record from a sample channel.
#[derive(Error, Debug)]
pub enum AcquisitionError {
    #[error("channel '{0}' closed")]
    Closed(String),

    #[error("device '{channel}' failed: {source}")]
    Device {
        channel: String,
        #[source]
        source: io::Error,
    },

    #[error("channel '{channel}' produced {got} bytes, expected {expected}")]
    RecordWidth {
        channel: String,
        got: usize,
        expected: usize,
    },
}
