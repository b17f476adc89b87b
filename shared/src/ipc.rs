//! IPC packet schema
//!
//! Every queue entry is an [`IpcPacket`]: a kind tag, a priority, the queue
//! the sender wants replies on, and an opaque protobuf payload whose type is
//! implied by the kind.

use bytes::Bytes;
use prost::{Enumeration, Message};

use crate::codec::CodecError;

/// Named queues known to both processes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum QueueId {
    Null = 0,
    /// Inbound queue of the bridge (replies for the vehicle link)
    Mavlink = 1,
    /// Inbound queue of the GPS producer (fix requests)
    Gps = 2,
}

impl QueueId {
    /// Stable name, used for socket file names
    pub fn name(self) -> &'static str {
        match self {
            QueueId::Null => "null",
            QueueId::Mavlink => "mavlink",
            QueueId::Gps => "gps",
        }
    }
}

impl std::fmt::Display for QueueId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What a packet carries; replies are correlated on this, not on sequence
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum PacketKind {
    Unknown = 0,
    GpsRequest = 1,
    GpsResponse = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Enumeration)]
#[repr(i32)]
pub enum Priority {
    Normal = 0,
    High = 1,
}

/// A single queue entry
#[derive(Clone, PartialEq, Message)]
pub struct IpcPacket {
    #[prost(enumeration = "PacketKind", tag = "1")]
    pub kind: i32,

    #[prost(enumeration = "Priority", tag = "2")]
    pub priority: i32,

    #[prost(enumeration = "QueueId", tag = "3")]
    pub reply_to: i32,

    #[prost(bytes = "bytes", tag = "4")]
    pub payload: Bytes,
}

impl IpcPacket {
    /// Create a new packet
    pub fn new(kind: PacketKind, priority: Priority, reply_to: QueueId, payload: Bytes) -> Self {
        Self {
            kind: kind.into(),
            priority: priority.into(),
            reply_to: reply_to.into(),
            payload,
        }
    }

    /// Packet kind, `Unknown` if the sender used a value we don't know
    pub fn packet_kind(&self) -> PacketKind {
        PacketKind::try_from(self.kind).unwrap_or(PacketKind::Unknown)
    }

    pub fn packet_priority(&self) -> Priority {
        Priority::try_from(self.priority).unwrap_or(Priority::Normal)
    }

    /// Queue the sender expects replies on
    pub fn reply_queue(&self) -> QueueId {
        QueueId::try_from(self.reply_to).unwrap_or(QueueId::Null)
    }
}

/// Request for a fresh fix. `num` is a diagnostic counter only.
#[derive(Clone, PartialEq, Message)]
pub struct GpsRequest {
    #[prost(int32, tag = "1")]
    pub num: i32,
}

impl GpsRequest {
    pub fn payload(&self) -> Bytes {
        Bytes::from(self.encode_to_vec())
    }

    pub fn from_payload(payload: &Bytes) -> Result<Self, CodecError> {
        Ok(Self::decode(payload.clone())?)
    }
}

/// A GPS fix in HIL_GPS units
///
/// Positions are degE7 / mm, velocities cm/s, accuracies cm. `u16::MAX`
/// in an accuracy or course field means unknown.
#[derive(Clone, PartialEq, Message)]
pub struct GpsFix {
    #[prost(uint64, tag = "1")]
    pub time_usec: u64,

    #[prost(sint32, tag = "2")]
    pub lat: i32,

    #[prost(sint32, tag = "3")]
    pub lon: i32,

    #[prost(sint32, tag = "4")]
    pub alt: i32,

    #[prost(uint32, tag = "5")]
    pub eph: u32,

    #[prost(uint32, tag = "6")]
    pub epv: u32,

    #[prost(uint32, tag = "7")]
    pub vel: u32,

    #[prost(sint32, tag = "8")]
    pub vn: i32,

    #[prost(sint32, tag = "9")]
    pub ve: i32,

    #[prost(sint32, tag = "10")]
    pub vd: i32,

    #[prost(uint32, tag = "11")]
    pub cog: u32,

    /// 0-1: no fix, 2: 2D fix, 3: 3D fix
    #[prost(uint32, tag = "12")]
    pub fix_type: u32,

    #[prost(uint32, tag = "13")]
    pub satellites_visible: u32,
}

impl GpsFix {
    pub fn payload(&self) -> Bytes {
        Bytes::from(self.encode_to_vec())
    }

    pub fn from_payload(payload: &Bytes) -> Result<Self, CodecError> {
        Ok(Self::decode(payload.clone())?)
    }

    pub fn has_3d_fix(&self) -> bool {
        self.fix_type >= 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_kind_maps_to_unknown() {
        let mut packet = IpcPacket::new(
            PacketKind::GpsRequest,
            Priority::Normal,
            QueueId::Mavlink,
            Bytes::new(),
        );
        packet.kind = 42;
        assert_eq!(packet.packet_kind(), PacketKind::Unknown);
        assert_eq!(packet.reply_queue(), QueueId::Mavlink);
    }

    #[test]
    fn test_fix_payload_decodes() {
        let fix = GpsFix {
            lat: 351523041,
            lon: 1369686962,
            fix_type: 3,
            ..Default::default()
        };
        let decoded = GpsFix::from_payload(&fix.payload()).expect("decode failed");
        assert_eq!(decoded.lat, 351523041);
        assert_eq!(decoded.lon, 1369686962);
        assert!(decoded.has_3d_fix());
    }

    #[test]
    fn test_garbage_payload_is_rejected() {
        let garbage = Bytes::from_static(&[0xff, 0xff, 0xff]);
        assert!(GpsFix::from_payload(&garbage).is_err());
    }

    #[test]
    fn test_queue_names() {
        assert_eq!(QueueId::Mavlink.name(), "mavlink");
        assert_eq!(QueueId::Gps.to_string(), "gps");
    }
}
