//! GPS Relay
//!
//! Fetches a fix from the producer process over the IPC queues and forwards
//! it to the autopilot. Replies are matched on packet kind only; anything
//! else arriving on the response queue is released and skipped.
//!
//! The wait for a reply is unbounded. A producer that never answers stalls
//! the call until the bridge stop token fires.

use anyhow::bail;
use mavlink::ardupilotmega::{
    GpsFixType, GpsInputIgnoreFlags, MavMessage, GLOBAL_POSITION_INT_DATA, GPS_INPUT_DATA,
    GPS_RAW_INT_DATA, HIL_GPS_DATA,
};
use offboard_shared::{
    GpsFix, GpsRequest, MessageQueue, PacketKind, Priority, QueueId, RecvTimeout,
};
use std::str::FromStr;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::context::BridgeContext;
use crate::error::{BridgeError, Result};
use crate::transport::{transmit, VehicleLink};

/// Message used to hand the fix to the autopilot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GpsForwardFormat {
    #[default]
    HilGps,
    GpsInput,
    GpsRawInt,
    GlobalPositionInt,
}

impl GpsForwardFormat {
    pub fn name(self) -> &'static str {
        match self {
            GpsForwardFormat::HilGps => "HIL_GPS",
            GpsForwardFormat::GpsInput => "GPS_INPUT",
            GpsForwardFormat::GpsRawInt => "GPS_RAW_INT",
            GpsForwardFormat::GlobalPositionInt => "GLOBAL_POSITION_INT",
        }
    }

    /// Encode a fix. Values that don't fit the target field saturate.
    ///
    /// `time_boot_ms` is only used by GLOBAL_POSITION_INT, which carries
    /// the bridge's boot clock instead of the fix's epoch time.
    pub fn to_message(self, fix: &GpsFix, gps_id: u8, time_boot_ms: u32) -> MavMessage {
        match self {
            GpsForwardFormat::HilGps => MavMessage::HIL_GPS(HIL_GPS_DATA {
                time_usec: fix.time_usec,
                lat: fix.lat,
                lon: fix.lon,
                alt: fix.alt,
                eph: sat_u16(fix.eph),
                epv: sat_u16(fix.epv),
                vel: sat_u16(fix.vel),
                vn: sat_i16(fix.vn),
                ve: sat_i16(fix.ve),
                vd: sat_i16(fix.vd),
                cog: sat_u16(fix.cog),
                fix_type: sat_u8(fix.fix_type),
                satellites_visible: sat_u8(fix.satellites_visible),
                ..Default::default()
            }),
            GpsForwardFormat::GpsInput => MavMessage::GPS_INPUT(GPS_INPUT_DATA {
                time_usec: fix.time_usec,
                gps_id,
                // Only position and fix are used
                ignore_flags: GpsInputIgnoreFlags::from_bits_truncate(0x00FF),
                lat: fix.lat,
                lon: fix.lon,
                alt: fix.alt as f32 / 1000.0,
                vn: fix.vn as f32 / 100.0,
                ve: fix.ve as f32 / 100.0,
                vd: fix.vd as f32 / 100.0,
                fix_type: sat_u8(fix.fix_type),
                satellites_visible: sat_u8(fix.satellites_visible),
                ..Default::default()
            }),
            GpsForwardFormat::GpsRawInt => MavMessage::GPS_RAW_INT(GPS_RAW_INT_DATA {
                time_usec: fix.time_usec,
                lat: fix.lat,
                lon: fix.lon,
                alt: fix.alt,
                eph: sat_u16(fix.eph),
                epv: sat_u16(fix.epv),
                vel: sat_u16(fix.vel),
                cog: sat_u16(fix.cog),
                fix_type: fix_type(fix.fix_type),
                satellites_visible: sat_u8(fix.satellites_visible),
                ..Default::default()
            }),
            GpsForwardFormat::GlobalPositionInt => {
                MavMessage::GLOBAL_POSITION_INT(GLOBAL_POSITION_INT_DATA {
                    time_boot_ms,
                    lat: fix.lat,
                    lon: fix.lon,
                    alt: fix.alt,
                    vx: sat_i16(fix.vn),
                    vy: sat_i16(fix.ve),
                    vz: sat_i16(fix.vd),
                    hdg: sat_u16(fix.cog),
                    ..Default::default()
                })
            }
        }
    }
}

impl FromStr for GpsForwardFormat {
    type Err = anyhow::Error;

    /// Message name, case-insensitive: `HIL_GPS`, `GPS_INPUT`, `GPS_RAW_INT`
    /// or `GLOBAL_POSITION_INT`
    fn from_str(s: &str) -> anyhow::Result<Self> {
        let format = match s.trim().to_ascii_uppercase().as_str() {
            "HIL_GPS" => GpsForwardFormat::HilGps,
            "GPS_INPUT" => GpsForwardFormat::GpsInput,
            "GPS_RAW_INT" => GpsForwardFormat::GpsRawInt,
            "GLOBAL_POSITION_INT" => GpsForwardFormat::GlobalPositionInt,
            _ => bail!("unknown GPS forward format {:?}", s),
        };
        Ok(format)
    }
}

fn sat_u8(v: u32) -> u8 {
    v.min(u8::MAX as u32) as u8
}

fn sat_u16(v: u32) -> u16 {
    v.min(u16::MAX as u32) as u16
}

fn sat_i16(v: i32) -> i16 {
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn fix_type(v: u32) -> GpsFixType {
    match v {
        0 => GpsFixType::GPS_FIX_TYPE_NO_GPS,
        1 => GpsFixType::GPS_FIX_TYPE_NO_FIX,
        2 => GpsFixType::GPS_FIX_TYPE_2D_FIX,
        3 => GpsFixType::GPS_FIX_TYPE_3D_FIX,
        4 => GpsFixType::GPS_FIX_TYPE_DGPS,
        5 => GpsFixType::GPS_FIX_TYPE_RTK_FLOAT,
        6 => GpsFixType::GPS_FIX_TYPE_RTK_FIXED,
        7 => GpsFixType::GPS_FIX_TYPE_STATIC,
        _ => GpsFixType::GPS_FIX_TYPE_PPP,
    }
}

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Queue the producer listens on
    pub request_queue: QueueId,
    /// Our queue, where replies arrive
    pub response_queue: QueueId,
    pub format: GpsForwardFormat,
    /// GPS_INPUT instance id
    pub gps_id: u8,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            request_queue: QueueId::Gps,
            response_queue: QueueId::Mavlink,
            format: GpsForwardFormat::default(),
            gps_id: 2,
        }
    }
}

/// Request/response bridge between the GPS producer and the autopilot
pub struct GpsRelay {
    ctx: Arc<BridgeContext>,
    link: Arc<dyn VehicleLink>,
    queues: Arc<dyn MessageQueue>,
    config: RelayConfig,
    /// Held for a whole round so requests never overlap
    in_flight: Mutex<()>,
    requests: AtomicI32,
}

impl GpsRelay {
    pub fn new(
        ctx: Arc<BridgeContext>,
        link: Arc<dyn VehicleLink>,
        queues: Arc<dyn MessageQueue>,
        config: RelayConfig,
    ) -> Self {
        Self {
            ctx,
            link,
            queues,
            config,
            in_flight: Mutex::new(()),
            requests: AtomicI32::new(0),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// One request/response round
    ///
    /// The forwarded fix carries `now_usec`, not the producer's timestamp.
    /// Returns the bytes written on the vehicle link.
    pub async fn relay_fix(&self, now_usec: u64) -> Result<usize> {
        let _round = self.in_flight.lock().await;
        let stop = self.ctx.run_state.stop_token();
        let num = self.requests.fetch_add(1, Ordering::SeqCst).wrapping_add(1);

        self.queues
            .send(
                self.config.request_queue,
                Priority::Normal,
                PacketKind::GpsRequest,
                self.config.response_queue,
                GpsRequest { num }.payload(),
            )
            .await?;
        debug!("[GPS] Request {} posted to {}", num, self.config.request_queue);

        let mut fix = loop {
            let entry = tokio::select! {
                _ = stop.cancelled() => {
                    info!("[GPS] Request {} abandoned on stop", num);
                    return Err(BridgeError::Cancelled);
                }
                entry = self.queues.receive(self.config.response_queue, RecvTimeout::Forever) => entry?,
            };

            if entry.kind() != PacketKind::GpsResponse {
                warn!(
                    "[GPS] Discarding {:?} while waiting for a GPS response",
                    entry.kind()
                );
                self.queues.release(entry);
                continue;
            }

            let decoded = GpsFix::from_payload(&entry.packet().payload);
            self.queues.release(entry);
            break decoded?;
        };

        fix.time_usec = now_usec;
        debug!("[GPS] Fix lat={} lon={} type={}", fix.lat, fix.lon, fix.fix_type);

        let message = self
            .config
            .format
            .to_message(&fix, self.config.gps_id, self.ctx.time_boot_ms());
        transmit(
            self.link.as_ref(),
            &self.ctx.header(),
            &message,
            self.config.format.name(),
        )
        .await
    }
}
