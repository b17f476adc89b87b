//! Lifecycle Module
//!
//! Startup and shutdown sequencing for the bridge loops.

mod controller;

pub use controller::{BridgeController, StartupOptions};
