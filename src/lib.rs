//! Off-board bridge
//!
//! Keeps an autopilot under external control: reads its telemetry, streams
//! setpoints at a fixed rate, sends one-shot commands and relays GPS fixes
//! fetched from a separate producer process.

pub mod autopilot;
pub mod context;
pub mod error;
pub mod gps;
pub mod lifecycle;
pub mod transport;
