//! GPS Module
//!
//! Pulls fixes from the external GPS producer over the IPC queues and
//! injects them into the autopilot.

mod relay;

pub use relay::{GpsForwardFormat, GpsRelay, RelayConfig};
