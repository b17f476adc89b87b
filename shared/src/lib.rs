//! Offboard Shared Types
//!
//! This crate provides the pieces both sides of the GPS relay need: the IPC
//! packet schema, the length-prefixed codec, the named message-queue contract
//! with its backends, and the bridge lifecycle state machine.

pub mod codec;
pub mod ipc;
pub mod queue;
pub mod state_machine;

use std::time::{SystemTime, UNIX_EPOCH};

// Re-export commonly used types at crate root
pub use ipc::{GpsFix, GpsRequest, IpcPacket, PacketKind, Priority, QueueId};
pub use queue::{MessageQueue, QueueEntry, QueueError, RecvTimeout};

/// Get current timestamp in microseconds since Unix epoch
pub fn now_usec() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}

/// Get current timestamp in milliseconds since Unix epoch
pub fn now_ms() -> u64 {
    now_usec() / 1000
}

/// Timing parameters for the bridge
pub mod timing {
    /// The autopilot drops out of off-board mode if it sees no setpoint for this long
    pub const OFFBOARD_SETPOINT_TIMEOUT_MS: u64 = 500;

    /// Setpoint streaming period (4 Hz)
    pub const SETPOINT_PERIOD_MS: u64 = 250;

    /// Startup poll interval while waiting for the vehicle identity
    pub const IDENTITY_POLL_MS: u64 = 500;

    /// Startup poll interval while waiting for the streamer to come up
    pub const WRITER_POLL_MS: u64 = 100;

    /// Reader back-off while the streamer is using the link
    pub const READER_YIELD_US: u64 = 100;

    /// Reader back-off after a failed receive
    pub const READER_ERROR_BACKOFF_MS: u64 = 10;

    /// Upper bound for joining a loop during shutdown
    pub const SHUTDOWN_JOIN_TIMEOUT_MS: u64 = 5000;

    /// Queue subsystem init retry interval
    pub const QUEUE_INIT_BACKOFF_MS: u64 = 1000;

    /// Queue subsystem init attempts before giving up
    pub const QUEUE_INIT_MAX_ATTEMPTS: u32 = 30;

    const _: () = assert!(SETPOINT_PERIOD_MS < OFFBOARD_SETPOINT_TIMEOUT_MS);
}
