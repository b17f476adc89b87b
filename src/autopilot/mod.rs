//! Autopilot Module
//!
//! Everything that talks MAVLink to the flight controller: the link itself,
//! the telemetry reader and store, the setpoint streamer and the one-shot
//! command dispatcher.

pub mod commands;
pub mod connection;
pub mod reader;
pub mod setpoint;
pub mod streamer;
pub mod telemetry;

pub use commands::{
    CommandDispatcher, CommandLong, GlobalLanding, GlobalTakeoff, LocalManeuver, MessageInterval,
};
pub use connection::{FcConfig, FcConnectionType, MavlinkPort, FC_ENV};
pub use reader::{run_reader, snapshot_complete, INITIAL_POSITION_KINDS};
pub use setpoint::{Setpoint, SetpointCell, SetpointTarget};
pub use streamer::{run_streamer, write_setpoint, SETPOINT_PERIOD};
pub use telemetry::{MessageKind, SessionIdentity, TelemetrySnapshot, TelemetryStore};
