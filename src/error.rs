//! Bridge error types

use offboard_shared::codec::CodecError;
use offboard_shared::state_machine::{LifecycleEvent, LifecycleState};
use offboard_shared::QueueError;
use std::time::Duration;
use thiserror::Error;

/// Typed failures surfaced by the bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// `start()` called on a link that is not open
    #[error("vehicle link is not open")]
    PortNotOpen,

    #[error("invalid lifecycle transition from {from} on {event:?}")]
    InvalidTransition {
        from: LifecycleState,
        event: LifecycleEvent,
    },

    /// A loop did not terminate within the join window
    #[error("{task} did not terminate within {timeout:?}")]
    ShutdownTimeout {
        task: &'static str,
        timeout: Duration,
    },

    #[error("{task} panicked: {reason}")]
    TaskPanicked { task: &'static str, reason: String },

    /// Selected a feature the autopilot link does not implement
    #[error("{0} setpoints are not supported")]
    Unsupported(&'static str),

    #[error("failed to write {what}: {reason}")]
    WriteFailed { what: &'static str, reason: String },

    /// Operation abandoned because a stop was requested
    #[error("cancelled by stop request")]
    Cancelled,

    #[error("IPC error: {0}")]
    Queue(#[from] QueueError),

    #[error("IPC payload error: {0}")]
    Codec(#[from] CodecError),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
