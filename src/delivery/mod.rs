//! Delivery side: routing, uplink, storage fallback and replay.

pub mod catalog;
pub mod monitor;
pub mod queue;
pub mod replay;
pub mod router;
pub mod storage;
pub mod transport;
pub mod uplink;
pub mod writer;
