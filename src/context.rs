//! Bridge context
//!
//! One explicit object owning everything the loops and one-shot operations
//! share: the telemetry store, the setpoint cell and the run flags. It is
//! handed around as `Arc<BridgeContext>`.

use mavlink::MavHeader;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::OnceLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::autopilot::{FcConfig, SetpointCell, TelemetryStore};

/// Streamer progress as seen by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WriterStatus {
    Idle = 0,
    /// Default installed, first write in flight
    Starting = 1,
    /// First write done, streaming at the fixed period
    Streaming = 2,
}

impl WriterStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => WriterStatus::Starting,
            2 => WriterStatus::Streaming,
            _ => WriterStatus::Idle,
        }
    }
}

/// Run flags. Each one is driven by exactly one party.
#[derive(Debug, Default)]
pub struct RunState {
    /// Set by the reader
    reading_active: AtomicBool,
    /// Set by the streamer
    writer: AtomicU8,
    /// Set by the off-board mode commands
    offboard_active: AtomicBool,
    /// Set by the reader once every streamed kind was seen
    all_received: AtomicBool,
    /// Cancelled by the controller
    stop: CancellationToken,
}

impl RunState {
    pub fn is_reading(&self) -> bool {
        self.reading_active.load(Ordering::SeqCst)
    }

    pub(crate) fn set_reading(&self, active: bool) {
        self.reading_active.store(active, Ordering::SeqCst);
    }

    pub fn writer_status(&self) -> WriterStatus {
        WriterStatus::from_u8(self.writer.load(Ordering::SeqCst))
    }

    pub(crate) fn set_writer_status(&self, status: WriterStatus) {
        self.writer.store(status as u8, Ordering::SeqCst);
    }

    /// Whether the streamer is running at all
    pub fn is_writing(&self) -> bool {
        self.writer_status() != WriterStatus::Idle
    }

    pub fn is_offboard_active(&self) -> bool {
        self.offboard_active.load(Ordering::SeqCst)
    }

    /// Flip off-board mode to `active`. Returns false if it already was.
    pub(crate) fn switch_offboard(&self, active: bool) -> bool {
        self.offboard_active
            .compare_exchange(!active, active, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn all_received(&self) -> bool {
        self.all_received.load(Ordering::SeqCst)
    }

    pub(crate) fn set_all_received(&self) {
        self.all_received.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub fn request_stop(&self) {
        self.stop.cancel();
    }

    /// Token the loops select on
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }
}

/// Local position and attitude captured at startup
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InitialPosition {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub vx: f32,
    pub vy: f32,
    pub vz: f32,
    pub yaw: f32,
    pub yaw_rate: f32,
}

/// Shared state of one bridge session
#[derive(Debug)]
pub struct BridgeContext {
    pub telemetry: TelemetryStore,
    pub setpoint: SetpointCell,
    pub run_state: RunState,
    config: FcConfig,
    initial_position: OnceLock<InitialPosition>,
    started: Instant,
}

impl BridgeContext {
    pub fn new(config: FcConfig) -> Self {
        Self {
            telemetry: TelemetryStore::new(),
            setpoint: SetpointCell::new(),
            run_state: RunState::default(),
            config,
            initial_position: OnceLock::new(),
            started: Instant::now(),
        }
    }

    pub fn config(&self) -> &FcConfig {
        &self.config
    }

    /// Header for everything this bridge sends
    pub fn header(&self) -> MavHeader {
        MavHeader {
            system_id: self.config.system_id,
            component_id: self.config.component_id,
            sequence: 0,
        }
    }

    /// (system, component) to address commands to: the learned identity,
    /// else the configured fallback
    pub fn targets(&self) -> (u8, u8) {
        match self.telemetry.identity() {
            Some(identity) => (identity.source_id, identity.component_id),
            None => (self.config.target_system, self.config.target_component),
        }
    }

    /// Milliseconds since this session started, wrapping like the autopilot's boot clock
    pub fn time_boot_ms(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }

    pub fn initial_position(&self) -> Option<InitialPosition> {
        self.initial_position.get().copied()
    }

    pub(crate) fn set_initial_position(&self, position: InitialPosition) -> bool {
        self.initial_position.set(position).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_fall_back_to_config() {
        let ctx = BridgeContext::new(FcConfig::default());
        assert_eq!(ctx.targets(), (1, 1));

        ctx.telemetry.learn_identity(&MavHeader {
            system_id: 3,
            component_id: 7,
            sequence: 0,
        });
        assert_eq!(ctx.targets(), (3, 7));
        assert_eq!(ctx.header().system_id, 255);
    }

    #[test]
    fn test_offboard_switch_is_idempotent() {
        let state = RunState::default();
        assert!(!state.is_offboard_active());

        assert!(state.switch_offboard(true));
        assert!(!state.switch_offboard(true));
        assert!(state.is_offboard_active());

        assert!(state.switch_offboard(false));
        assert!(!state.switch_offboard(false));
    }

    #[test]
    fn test_writer_status() {
        let state = RunState::default();
        assert_eq!(state.writer_status(), WriterStatus::Idle);
        assert!(!state.is_writing());

        state.set_writer_status(WriterStatus::Streaming);
        assert!(state.is_writing());
    }

    #[test]
    fn test_stop_token_shared() {
        let state = RunState::default();
        let token = state.stop_token();
        assert!(!token.is_cancelled());

        state.request_stop();
        assert!(token.is_cancelled());
        assert!(state.stop_requested());
    }
}
