//! Setpoint model and the shared setpoint cell

use mavlink::ardupilotmega::{
    MavFrame, MavMessage, PositionTargetTypemask, SET_POSITION_TARGET_LOCAL_NED_DATA,
};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{BridgeError, Result};

/// Type masks for SET_POSITION_TARGET_LOCAL_NED. A set bit means "ignore".
pub mod mask {
    /// Use x/y/z only
    pub const POSITION: u16 = 0b0000_1101_1111_1000;
    /// Use vx/vy/vz only
    pub const VELOCITY: u16 = 0b0000_1101_1100_0111;
    /// Also use yaw
    pub const YAW_ANGLE: u16 = 0b0000_1001_1111_1111;
    /// Also use yaw rate
    pub const YAW_RATE: u16 = 0b0000_0101_1111_1111;
}

/// Which part of the setpoint the autopilot should follow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetpointTarget {
    Position,
    Velocity,
    /// Declared by the protocol but not implemented by this bridge
    Acceleration,
}

/// A local-frame target, copied whole in and out of the cell
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setpoint {
    pub target: SetpointTarget,
    pub frame: MavFrame,
    pub type_mask: u16,
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub vx: f32,
    pub vy: f32,
    pub vz: f32,
    pub yaw: f32,
    pub yaw_rate: f32,
}

impl Setpoint {
    /// Empty setpoint of the given kind, all values zero
    pub fn new(target: SetpointTarget) -> Result<Self> {
        let type_mask = match target {
            SetpointTarget::Position => mask::POSITION,
            SetpointTarget::Velocity => mask::VELOCITY,
            SetpointTarget::Acceleration => return Err(BridgeError::Unsupported("acceleration")),
        };

        Ok(Self {
            target,
            frame: MavFrame::MAV_FRAME_LOCAL_NED,
            type_mask,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            vx: 0.0,
            vy: 0.0,
            vz: 0.0,
            yaw: 0.0,
            yaw_rate: 0.0,
        })
    }

    /// Fly to a local NED position (m)
    pub fn position(x: f32, y: f32, z: f32) -> Self {
        Self {
            target: SetpointTarget::Position,
            type_mask: mask::POSITION,
            x,
            y,
            z,
            ..Self::hold()
        }
    }

    /// Fly at a local NED velocity (m/s)
    pub fn velocity(vx: f32, vy: f32, vz: f32) -> Self {
        Self {
            target: SetpointTarget::Velocity,
            type_mask: mask::VELOCITY,
            vx,
            vy,
            vz,
            ..Self::hold()
        }
    }

    /// Always rejected
    pub fn acceleration(_afx: f32, _afy: f32, _afz: f32) -> Result<Self> {
        Self::new(SetpointTarget::Acceleration)
    }

    /// Zero velocity, zero yaw rate. Installed when streaming starts.
    pub fn hold() -> Self {
        Self {
            target: SetpointTarget::Velocity,
            frame: MavFrame::MAV_FRAME_LOCAL_NED,
            type_mask: mask::VELOCITY & mask::YAW_RATE,
            x: 0.0,
            y: 0.0,
            z: 0.0,
            vx: 0.0,
            vy: 0.0,
            vz: 0.0,
            yaw: 0.0,
            yaw_rate: 0.0,
        }
    }

    /// Also command a heading (rad)
    pub fn with_yaw(mut self, yaw: f32) -> Self {
        self.type_mask &= mask::YAW_ANGLE;
        self.yaw = yaw;
        self
    }

    /// Also command a yaw rate (rad/s)
    pub fn with_yaw_rate(mut self, yaw_rate: f32) -> Self {
        self.type_mask &= mask::YAW_RATE;
        self.yaw_rate = yaw_rate;
        self
    }

    pub fn to_message(&self, target_system: u8, target_component: u8, time_boot_ms: u32) -> MavMessage {
        MavMessage::SET_POSITION_TARGET_LOCAL_NED(SET_POSITION_TARGET_LOCAL_NED_DATA {
            time_boot_ms,
            target_system,
            target_component,
            coordinate_frame: self.frame,
            type_mask: PositionTargetTypemask::from_bits_truncate(self.type_mask),
            x: self.x,
            y: self.y,
            z: self.z,
            vx: self.vx,
            vy: self.vy,
            vz: self.vz,
            yaw: self.yaw,
            yaw_rate: self.yaw_rate,
            ..Default::default()
        })
    }
}

impl Default for Setpoint {
    fn default() -> Self {
        Self::hold()
    }
}

/// The single current setpoint. The lock is only held for the copy.
#[derive(Debug, Default)]
pub struct SetpointCell {
    current: Mutex<Setpoint>,
}

impl SetpointCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current setpoint
    pub async fn update(&self, setpoint: Setpoint) -> Result<()> {
        if setpoint.target == SetpointTarget::Acceleration {
            return Err(BridgeError::Unsupported("acceleration"));
        }
        *self.current.lock().await = setpoint;
        debug!("[STREAMER] Setpoint updated: {:?}", setpoint.target);
        Ok(())
    }

    /// Copy of the current setpoint
    pub async fn current(&self) -> Setpoint {
        *self.current.lock().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_is_zero_velocity_and_yaw_rate() {
        let sp = Setpoint::hold();
        assert_eq!(sp.target, SetpointTarget::Velocity);
        assert_eq!(sp.type_mask, 0b0000_0101_1100_0111);
        assert_eq!((sp.vx, sp.vy, sp.vz, sp.yaw_rate), (0.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn test_yaw_modifiers_clear_ignore_bits() {
        let sp = Setpoint::position(1.0, 2.0, -3.0).with_yaw(0.5);
        assert_eq!(sp.type_mask, mask::POSITION & mask::YAW_ANGLE);
        assert_eq!(sp.yaw, 0.5);

        let sp = Setpoint::velocity(1.0, 0.0, 0.0).with_yaw_rate(0.1);
        assert_eq!(sp.type_mask, mask::VELOCITY & mask::YAW_RATE);
        assert_eq!(sp.yaw_rate, 0.1);
    }

    #[test]
    fn test_acceleration_is_rejected() {
        assert!(matches!(
            Setpoint::acceleration(0.0, 0.0, 1.0),
            Err(BridgeError::Unsupported("acceleration"))
        ));
        assert!(Setpoint::new(SetpointTarget::Acceleration).is_err());
        assert!(Setpoint::new(SetpointTarget::Position).is_ok());
    }

    #[test]
    fn test_to_message_carries_targets() {
        let msg = Setpoint::velocity(1.0, 0.0, 0.0).to_message(1, 1, 1234);
        match msg {
            MavMessage::SET_POSITION_TARGET_LOCAL_NED(data) => {
                assert_eq!(data.target_system, 1);
                assert_eq!(data.target_component, 1);
                assert_eq!(data.time_boot_ms, 1234);
                assert_eq!(data.vx, 1.0);
                assert_eq!(data.type_mask.bits(), mask::VELOCITY);
                assert_eq!(data.coordinate_frame, MavFrame::MAV_FRAME_LOCAL_NED);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cell_rejects_acceleration() {
        let cell = SetpointCell::new();
        let mut sp = Setpoint::hold();
        sp.target = SetpointTarget::Acceleration;

        assert!(cell.update(sp).await.is_err());
        assert_eq!(cell.current().await, Setpoint::hold());

        cell.update(Setpoint::position(1.0, 1.0, -2.0)).await.unwrap();
        assert_eq!(cell.current().await.target, SetpointTarget::Position);
    }
}
