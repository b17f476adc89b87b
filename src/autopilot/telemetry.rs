//! Telemetry Store
//!
//! Keeps the last decoded value and receipt time for each inbound message
//! kind, plus the identity of the autopilot on the other end of the link.
//! Only the reader loop writes here; everyone else reads snapshots.

use mavlink::ardupilotmega::{
    MavMessage, ATTITUDE_DATA, BATTERY_STATUS_DATA, COMMAND_ACK_DATA, GLOBAL_POSITION_INT_DATA,
    GPS_RAW_INT_DATA, HEARTBEAT_DATA, HIGHRES_IMU_DATA, LOCAL_POSITION_NED_DATA,
    POSITION_TARGET_GLOBAL_INT_DATA, POSITION_TARGET_LOCAL_NED_DATA, RADIO_STATUS_DATA,
    SYS_STATUS_DATA,
};
use mavlink::MavHeader;
use std::sync::OnceLock;
use tokio::sync::RwLock;
use tracing::info;

/// The closed set of inbound message kinds the store tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Heartbeat,
    SysStatus,
    BatteryStatus,
    RadioStatus,
    LocalPositionNed,
    GlobalPositionInt,
    PositionTargetLocalNed,
    PositionTargetGlobalInt,
    HighresImu,
    Attitude,
    GpsRawInt,
    CommandAck,
}

impl MessageKind {
    pub const ALL: [MessageKind; 12] = [
        MessageKind::Heartbeat,
        MessageKind::SysStatus,
        MessageKind::BatteryStatus,
        MessageKind::RadioStatus,
        MessageKind::LocalPositionNed,
        MessageKind::GlobalPositionInt,
        MessageKind::PositionTargetLocalNed,
        MessageKind::PositionTargetGlobalInt,
        MessageKind::HighresImu,
        MessageKind::Attitude,
        MessageKind::GpsRawInt,
        MessageKind::CommandAck,
    ];

    /// Kinds the autopilot streams on its own. Acks only follow a command.
    pub fn is_streamed(self) -> bool {
        self != MessageKind::CommandAck
    }

    pub fn from_message(message: &MavMessage) -> Option<Self> {
        let kind = match message {
            MavMessage::HEARTBEAT(_) => MessageKind::Heartbeat,
            MavMessage::SYS_STATUS(_) => MessageKind::SysStatus,
            MavMessage::BATTERY_STATUS(_) => MessageKind::BatteryStatus,
            MavMessage::RADIO_STATUS(_) => MessageKind::RadioStatus,
            MavMessage::LOCAL_POSITION_NED(_) => MessageKind::LocalPositionNed,
            MavMessage::GLOBAL_POSITION_INT(_) => MessageKind::GlobalPositionInt,
            MavMessage::POSITION_TARGET_LOCAL_NED(_) => MessageKind::PositionTargetLocalNed,
            MavMessage::POSITION_TARGET_GLOBAL_INT(_) => MessageKind::PositionTargetGlobalInt,
            MavMessage::HIGHRES_IMU(_) => MessageKind::HighresImu,
            MavMessage::ATTITUDE(_) => MessageKind::Attitude,
            MavMessage::GPS_RAW_INT(_) => MessageKind::GpsRawInt,
            MavMessage::COMMAND_ACK(_) => MessageKind::CommandAck,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Heartbeat => "HEARTBEAT",
            MessageKind::SysStatus => "SYS_STATUS",
            MessageKind::BatteryStatus => "BATTERY_STATUS",
            MessageKind::RadioStatus => "RADIO_STATUS",
            MessageKind::LocalPositionNed => "LOCAL_POSITION_NED",
            MessageKind::GlobalPositionInt => "GLOBAL_POSITION_INT",
            MessageKind::PositionTargetLocalNed => "POSITION_TARGET_LOCAL_NED",
            MessageKind::PositionTargetGlobalInt => "POSITION_TARGET_GLOBAL_INT",
            MessageKind::HighresImu => "HIGHRES_IMU",
            MessageKind::Attitude => "ATTITUDE",
            MessageKind::GpsRawInt => "GPS_RAW_INT",
            MessageKind::CommandAck => "COMMAND_ACK",
        }
    }

    /// MAVLink message id, as used by SET_MESSAGE_INTERVAL
    pub fn message_id(self) -> u32 {
        match self {
            MessageKind::Heartbeat => 0,
            MessageKind::SysStatus => 1,
            MessageKind::BatteryStatus => 147,
            MessageKind::RadioStatus => 109,
            MessageKind::LocalPositionNed => 32,
            MessageKind::GlobalPositionInt => 33,
            MessageKind::PositionTargetLocalNed => 85,
            MessageKind::PositionTargetGlobalInt => 87,
            MessageKind::HighresImu => 105,
            MessageKind::Attitude => 30,
            MessageKind::GpsRawInt => 24,
            MessageKind::CommandAck => 77,
        }
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

/// A decoded value and when it was received (usec since epoch)
#[derive(Debug, Clone)]
pub struct Stamped<T> {
    pub value: T,
    pub received_usec: u64,
}

/// Latest value per message kind
#[derive(Debug, Clone, Default)]
pub struct TelemetrySnapshot {
    pub heartbeat: Option<Stamped<HEARTBEAT_DATA>>,
    pub sys_status: Option<Stamped<SYS_STATUS_DATA>>,
    pub battery_status: Option<Stamped<BATTERY_STATUS_DATA>>,
    pub radio_status: Option<Stamped<RADIO_STATUS_DATA>>,
    pub local_position_ned: Option<Stamped<LOCAL_POSITION_NED_DATA>>,
    pub global_position_int: Option<Stamped<GLOBAL_POSITION_INT_DATA>>,
    pub position_target_local_ned: Option<Stamped<POSITION_TARGET_LOCAL_NED_DATA>>,
    pub position_target_global_int: Option<Stamped<POSITION_TARGET_GLOBAL_INT_DATA>>,
    pub highres_imu: Option<Stamped<HIGHRES_IMU_DATA>>,
    pub attitude: Option<Stamped<ATTITUDE_DATA>>,
    pub gps_raw_int: Option<Stamped<GPS_RAW_INT_DATA>>,
    pub command_ack: Option<Stamped<COMMAND_ACK_DATA>>,
}

impl TelemetrySnapshot {
    /// Receipt time of a kind, if it has been seen
    pub fn received_usec(&self, kind: MessageKind) -> Option<u64> {
        match kind {
            MessageKind::Heartbeat => self.heartbeat.as_ref().map(|s| s.received_usec),
            MessageKind::SysStatus => self.sys_status.as_ref().map(|s| s.received_usec),
            MessageKind::BatteryStatus => self.battery_status.as_ref().map(|s| s.received_usec),
            MessageKind::RadioStatus => self.radio_status.as_ref().map(|s| s.received_usec),
            MessageKind::LocalPositionNed => {
                self.local_position_ned.as_ref().map(|s| s.received_usec)
            }
            MessageKind::GlobalPositionInt => {
                self.global_position_int.as_ref().map(|s| s.received_usec)
            }
            MessageKind::PositionTargetLocalNed => {
                self.position_target_local_ned.as_ref().map(|s| s.received_usec)
            }
            MessageKind::PositionTargetGlobalInt => {
                self.position_target_global_int.as_ref().map(|s| s.received_usec)
            }
            MessageKind::HighresImu => self.highres_imu.as_ref().map(|s| s.received_usec),
            MessageKind::Attitude => self.attitude.as_ref().map(|s| s.received_usec),
            MessageKind::GpsRawInt => self.gps_raw_int.as_ref().map(|s| s.received_usec),
            MessageKind::CommandAck => self.command_ack.as_ref().map(|s| s.received_usec),
        }
    }
}

/// Update a slot, keeping its receipt time non-decreasing
fn stamp<T: Clone>(slot: &mut Option<Stamped<T>>, value: &T, now_usec: u64) {
    let received_usec = match slot {
        Some(prev) => prev.received_usec.max(now_usec),
        None => now_usec,
    };
    *slot = Some(Stamped {
        value: value.clone(),
        received_usec,
    });
}

/// (source, component) of the connected autopilot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionIdentity {
    pub source_id: u8,
    pub component_id: u8,
}

/// Shared telemetry state
#[derive(Debug, Default)]
pub struct TelemetryStore {
    snapshot: RwLock<TelemetrySnapshot>,
    identity: OnceLock<SessionIdentity>,
}

impl TelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the sender of the first message; later senders never override it
    pub fn learn_identity(&self, header: &MavHeader) -> bool {
        let identity = SessionIdentity {
            source_id: header.system_id,
            component_id: header.component_id,
        };
        let learned = self.identity.set(identity).is_ok();
        if learned {
            info!(
                "[READER] Autopilot identity: system {} component {}",
                identity.source_id, identity.component_id
            );
        }
        learned
    }

    pub fn identity(&self) -> Option<SessionIdentity> {
        self.identity.get().copied()
    }

    /// Store a message. Returns its kind, or `None` for kinds we don't track.
    pub async fn record(&self, message: &MavMessage, now_usec: u64) -> Option<MessageKind> {
        let kind = MessageKind::from_message(message)?;
        let mut snap = self.snapshot.write().await;

        match message {
            MavMessage::HEARTBEAT(d) => stamp(&mut snap.heartbeat, d, now_usec),
            MavMessage::SYS_STATUS(d) => stamp(&mut snap.sys_status, d, now_usec),
            MavMessage::BATTERY_STATUS(d) => stamp(&mut snap.battery_status, d, now_usec),
            MavMessage::RADIO_STATUS(d) => stamp(&mut snap.radio_status, d, now_usec),
            MavMessage::LOCAL_POSITION_NED(d) => stamp(&mut snap.local_position_ned, d, now_usec),
            MavMessage::GLOBAL_POSITION_INT(d) => {
                stamp(&mut snap.global_position_int, d, now_usec)
            }
            MavMessage::POSITION_TARGET_LOCAL_NED(d) => {
                stamp(&mut snap.position_target_local_ned, d, now_usec)
            }
            MavMessage::POSITION_TARGET_GLOBAL_INT(d) => {
                stamp(&mut snap.position_target_global_int, d, now_usec)
            }
            MavMessage::HIGHRES_IMU(d) => stamp(&mut snap.highres_imu, d, now_usec),
            MavMessage::ATTITUDE(d) => stamp(&mut snap.attitude, d, now_usec),
            MavMessage::GPS_RAW_INT(d) => stamp(&mut snap.gps_raw_int, d, now_usec),
            MavMessage::COMMAND_ACK(d) => stamp(&mut snap.command_ack, d, now_usec),
            _ => return None,
        }

        Some(kind)
    }

    /// Copy of the current snapshot
    pub async fn snapshot(&self) -> TelemetrySnapshot {
        self.snapshot.read().await.clone()
    }

    pub async fn has_received(&self, kind: MessageKind) -> bool {
        self.snapshot.read().await.received_usec(kind).is_some()
    }
}

/// Tracks which streamed kinds have been seen since the reader started
#[derive(Debug, Default)]
pub struct ReceiptTracker {
    seen: u16,
}

impl ReceiptTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a kind as seen. Returns true exactly once: when the last missing
    /// streamed kind arrives.
    pub fn mark(&mut self, kind: MessageKind) -> bool {
        let was_complete = self.is_complete();
        self.seen |= kind.bit();
        !was_complete && self.is_complete()
    }

    pub fn is_complete(&self) -> bool {
        MessageKind::ALL
            .iter()
            .filter(|kind| kind.is_streamed())
            .all(|kind| self.seen & kind.bit() != 0)
    }

    /// Streamed kinds not seen yet
    pub fn missing(&self) -> Vec<MessageKind> {
        MessageKind::ALL
            .iter()
            .copied()
            .filter(|kind| kind.is_streamed() && self.seen & kind.bit() == 0)
            .collect()
    }
}
