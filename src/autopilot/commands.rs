//! MAVLink Command Dispatcher
//!
//! One-shot COMMAND_LONG builders. Each operation encodes a command, writes
//! it once and returns the byte count. There is no retry and no ack
//! correlation: acks show up in the telemetry store as COMMAND_ACK.

use mavlink::ardupilotmega::{MavCmd, MavMessage, COMMAND_LONG_DATA};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::telemetry::MessageKind;
use crate::context::BridgeContext;
use crate::error::Result;
use crate::transport::{transmit, VehicleLink};

/// A COMMAND_LONG with explicitly unset parameters
///
/// Unset parameters go out as NaN, which the autopilot reads as "not
/// applicable"; zero would be taken as a real value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandLong {
    pub command: MavCmd,
    pub params: [Option<f32>; 7],
}

impl CommandLong {
    pub fn new(command: MavCmd) -> Self {
        Self {
            command,
            params: [None; 7],
        }
    }

    /// Set parameter `index` (1-based, as in the MAVLink docs)
    pub fn param(mut self, index: usize, value: f32) -> Self {
        debug_assert!((1..=7).contains(&index), "COMMAND_LONG has params 1..=7");
        if let Some(slot) = self.params.get_mut(index.wrapping_sub(1)) {
            *slot = Some(value);
        }
        self
    }

    pub fn to_message(&self, target_system: u8, target_component: u8) -> MavMessage {
        let p = self.params.map(|v| v.unwrap_or(f32::NAN));
        MavMessage::COMMAND_LONG(COMMAND_LONG_DATA {
            target_system,
            target_component,
            command: self.command,
            confirmation: 0,
            param1: p[0],
            param2: p[1],
            param3: p[2],
            param4: p[3],
            param5: p[4],
            param6: p[5],
            param7: p[6],
        })
    }
}

/// Requested stream interval for SET_MESSAGE_INTERVAL
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageInterval {
    /// Autopilot default rate
    Default,
    Disabled,
    Every(Duration),
}

impl MessageInterval {
    fn as_param(self) -> f32 {
        match self {
            MessageInterval::Default => 0.0,
            MessageInterval::Disabled => -1.0,
            MessageInterval::Every(period) => period.as_micros() as f32,
        }
    }
}

/// Local-frame takeoff/landing target (NED, metres)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LocalManeuver {
    /// Climb or descent rate (m/s)
    pub rate: f32,
    pub yaw: f32,
    pub x: f32,
    pub y: f32,
    /// Positive down
    pub z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GlobalTakeoff {
    pub pitch: f32,
    pub yaw: f32,
    pub latitude: f32,
    pub longitude: f32,
    pub altitude: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GlobalLanding {
    /// Precision land mode (0 = disabled)
    pub land_mode: f32,
    pub yaw: f32,
    pub latitude: f32,
    pub longitude: f32,
    pub altitude: f32,
}

/// Sends commands to the flight controller via MAVLink
pub struct CommandDispatcher {
    ctx: Arc<BridgeContext>,
    link: Arc<dyn VehicleLink>,
}

impl CommandDispatcher {
    /// Create a new command dispatcher
    pub fn new(ctx: Arc<BridgeContext>, link: Arc<dyn VehicleLink>) -> Self {
        Self { ctx, link }
    }

    async fn send(&self, command: CommandLong, what: &'static str) -> Result<usize> {
        let (target_system, target_component) = self.ctx.targets();
        let message = command.to_message(target_system, target_component);
        let written = transmit(self.link.as_ref(), &self.ctx.header(), &message, what).await?;
        debug!("[CMD] {} sent ({} bytes)", what, written);
        Ok(written)
    }

    /// Arm (`true`) or disarm (`false`)
    pub async fn arm_disarm(&self, arm: bool) -> Result<usize> {
        info!("[CMD] Sending {} command", if arm { "ARM" } else { "DISARM" });
        let command =
            CommandLong::new(MavCmd::MAV_CMD_COMPONENT_ARM_DISARM).param(1, if arm { 1.0 } else { 0.0 });
        self.send(command, "MAV_CMD_COMPONENT_ARM_DISARM").await
    }

    pub async fn arm(&self) -> Result<usize> {
        self.arm_disarm(true).await
    }

    pub async fn disarm(&self) -> Result<usize> {
        self.arm_disarm(false).await
    }

    /// Send MAV_CMD_NAV_GUIDED_ENABLE regardless of the tracked mode
    pub async fn toggle_offboard_control(&self, enable: bool) -> Result<usize> {
        let command = CommandLong::new(MavCmd::MAV_CMD_NAV_GUIDED_ENABLE)
            .param(1, if enable { 1.0 } else { 0.0 });
        self.send(command, "MAV_CMD_NAV_GUIDED_ENABLE").await
    }

    /// Enter off-board mode. `Ok(None)` if already active.
    pub async fn enable_offboard_control(&self) -> Result<Option<usize>> {
        self.switch_offboard(true).await
    }

    /// Leave off-board mode. `Ok(None)` if not active.
    pub async fn disable_offboard_control(&self) -> Result<Option<usize>> {
        self.switch_offboard(false).await
    }

    async fn switch_offboard(&self, enable: bool) -> Result<Option<usize>> {
        let label = if enable { "ENABLE" } else { "DISABLE" };
        if !self.ctx.run_state.switch_offboard(enable) {
            debug!("[CMD] Off-board mode already {}D", label);
            return Ok(None);
        }

        info!("[CMD] {} OFFBOARD MODE", label);
        match self.toggle_offboard_control(enable).await {
            Ok(written) => Ok(Some(written)),
            Err(e) => {
                // Not written, so the autopilot is still in the old mode
                self.ctx.run_state.switch_offboard(!enable);
                error!("[CMD] Off-board mode not changed: {}", e);
                Err(e)
            }
        }
    }

    /// Ask for AUTOPILOT_VERSION
    pub async fn request_autopilot_capabilities(&self) -> Result<usize> {
        let command = CommandLong::new(MavCmd::MAV_CMD_REQUEST_AUTOPILOT_CAPABILITIES).param(1, 1.0);
        self.send(command, "MAV_CMD_REQUEST_AUTOPILOT_CAPABILITIES").await
    }

    /// Set the stream interval of one message id
    pub async fn set_message_interval(&self, message_id: u32, interval: MessageInterval) -> Result<usize> {
        info!("[CMD] Message {} interval: {:?}", message_id, interval);
        let command = CommandLong::new(MavCmd::MAV_CMD_SET_MESSAGE_INTERVAL)
            .param(1, message_id as f32)
            .param(2, interval.as_param());
        self.send(command, "MAV_CMD_SET_MESSAGE_INTERVAL").await
    }

    /// Ask for every streamed telemetry kind at `interval`
    ///
    /// Stops at the first failed write. Returns the total bytes written.
    pub async fn request_telemetry_streams(&self, interval: MessageInterval) -> Result<usize> {
        let mut written = 0;
        for kind in MessageKind::ALL.into_iter().filter(|k| k.is_streamed()) {
            debug!("[CMD] Requesting {} stream", kind.as_str());
            written += self.set_message_interval(kind.message_id(), interval).await?;
        }
        Ok(written)
    }

    pub async fn takeoff_local(&self, target: LocalManeuver) -> Result<usize> {
        info!("[CMD] TAKEOFF_LOCAL to [{}, {}, {}]", target.x, target.y, target.z);
        let command = local_maneuver(MavCmd::MAV_CMD_NAV_TAKEOFF_LOCAL, target);
        self.send(command, "MAV_CMD_NAV_TAKEOFF_LOCAL").await
    }

    pub async fn land_local(&self, target: LocalManeuver) -> Result<usize> {
        info!("[CMD] LAND_LOCAL at [{}, {}, {}]", target.x, target.y, target.z);
        let command = local_maneuver(MavCmd::MAV_CMD_NAV_LAND_LOCAL, target);
        self.send(command, "MAV_CMD_NAV_LAND_LOCAL").await
    }

    /// Take off to a global position
    pub async fn takeoff(&self, target: GlobalTakeoff) -> Result<usize> {
        info!("[CMD] TAKEOFF to {}m", target.altitude);
        let command = CommandLong::new(MavCmd::MAV_CMD_NAV_TAKEOFF)
            .param(1, target.pitch)
            .param(4, target.yaw)
            .param(5, target.latitude)
            .param(6, target.longitude)
            .param(7, target.altitude);
        self.send(command, "MAV_CMD_NAV_TAKEOFF").await
    }

    /// Land at a global position
    pub async fn land(&self, target: GlobalLanding) -> Result<usize> {
        info!("[CMD] LAND at ({}, {})", target.latitude, target.longitude);
        // Abort altitude stays unset
        let command = CommandLong::new(MavCmd::MAV_CMD_NAV_LAND)
            .param(2, target.land_mode)
            .param(4, target.yaw)
            .param(5, target.latitude)
            .param(6, target.longitude)
            .param(7, target.altitude);
        self.send(command, "MAV_CMD_NAV_LAND").await
    }
}

fn local_maneuver(command: MavCmd, target: LocalManeuver) -> CommandLong {
    CommandLong::new(command)
        .param(3, target.rate)
        .param(4, target.yaw)
        .param(5, target.x)
        .param(6, target.y)
        .param(7, target.z)
}
