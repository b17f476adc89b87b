//! Flight Controller Connection
//!
//! Opens the MAVLink link to an ArduPilot/PX4 flight controller via serial,
//! UDP or TCP and exposes it as a [`VehicleLink`].

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use mavlink::ardupilotmega::MavMessage;
use mavlink::{MavConnection, MavHeader};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::transport::VehicleLink;

/// Environment variable selecting the link, e.g. `udp:127.0.0.1:14540`
pub const FC_ENV: &str = "OFFBOARD_FC";

/// Connection type for flight controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FcConnectionType {
    /// Serial port connection (e.g., "/dev/ttyACM0" or "/dev/serial0")
    Serial { port: String, baud: u32 },
    /// UDP connection (e.g., "127.0.0.1:14540")
    Udp { address: String },
    /// TCP connection (e.g., "127.0.0.1:5760")
    Tcp { address: String },
}

impl Default for FcConnectionType {
    fn default() -> Self {
        // PX4 SITL offboard port
        Self::Udp {
            address: "127.0.0.1:14540".into(),
        }
    }
}

impl FcConnectionType {
    /// Address string understood by `mavlink::connect`
    pub fn address(&self) -> String {
        match self {
            FcConnectionType::Serial { port, baud } => format!("serial:{}:{}", port, baud),
            FcConnectionType::Udp { address } => format!("udpin:{}", address),
            FcConnectionType::Tcp { address } => format!("tcpout:{}", address),
        }
    }
}

impl FromStr for FcConnectionType {
    type Err = anyhow::Error;

    /// `udp:ADDR`, `tcp:ADDR` or `serial:PATH:BAUD`
    fn from_str(s: &str) -> Result<Self> {
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| anyhow!("missing link scheme in {:?}", s))?;
        if rest.is_empty() {
            bail!("missing link address in {:?}", s);
        }

        match scheme {
            "udp" => Ok(Self::Udp {
                address: rest.to_string(),
            }),
            "tcp" => Ok(Self::Tcp {
                address: rest.to_string(),
            }),
            "serial" => {
                let (port, baud) = rest
                    .rsplit_once(':')
                    .ok_or_else(|| anyhow!("serial link needs PATH:BAUD, got {:?}", rest))?;
                let baud = baud
                    .parse::<u32>()
                    .with_context(|| format!("invalid baud rate {:?}", baud))?;
                Ok(Self::Serial {
                    port: port.to_string(),
                    baud,
                })
            }
            other => bail!("unknown link scheme {:?}", other),
        }
    }
}

/// Configuration for flight controller connection
#[derive(Debug, Clone)]
pub struct FcConfig {
    /// Connection type and parameters
    pub connection: FcConnectionType,
    /// System ID for this companion computer
    pub system_id: u8,
    /// Component ID for this companion computer
    pub component_id: u8,
    /// Target system ID used until the autopilot identity is learned
    pub target_system: u8,
    /// Target component ID used until the autopilot identity is learned
    pub target_component: u8,
}

impl Default for FcConfig {
    fn default() -> Self {
        Self {
            connection: FcConnectionType::default(),
            system_id: 255,      // Companion computer
            component_id: 190,   // MAV_COMP_ID_ONBOARD_COMPUTER
            target_system: 1,    // Autopilot
            target_component: 1, // MAV_COMP_ID_AUTOPILOT1
        }
    }
}

impl FcConfig {
    /// Defaults, with the link taken from `OFFBOARD_FC` when set
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(link) = std::env::var(FC_ENV) {
            config.connection = link
                .parse::<FcConnectionType>()
                .with_context(|| format!("invalid {}", FC_ENV))?;
        }
        Ok(config)
    }
}

/// Warn when the configured serial device is not present
fn check_serial_port(port: &str) {
    match tokio_serial::available_ports() {
        Ok(ports) => {
            if !ports.iter().any(|p| p.port_name == port) {
                let known: Vec<_> = ports.iter().map(|p| p.port_name.as_str()).collect();
                warn!("[FC] Serial port {} not found (available: {:?})", port, known);
            }
        }
        Err(e) => warn!("[FC] Could not enumerate serial ports: {}", e),
    }
}

/// An open MAVLink connection to the flight controller
pub struct MavlinkPort {
    connection: Arc<dyn MavConnection<MavMessage> + Send + Sync>,
    running: AtomicBool,
    address: String,
}

impl MavlinkPort {
    /// Open the configured link
    pub fn open(config: &FcConfig) -> Result<Self> {
        if let FcConnectionType::Serial { port, .. } = &config.connection {
            check_serial_port(port);
        }

        let address = config.connection.address();
        info!("[FC] Connecting to flight controller at {}", address);

        let connection = mavlink::connect::<MavMessage>(&address)
            .with_context(|| format!("failed to open {}", address))?;

        info!("[FC] Link open");
        Ok(Self {
            connection: Arc::from(connection),
            running: AtomicBool::new(true),
            address,
        })
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Mark the link closed. Only safe once the bridge is stopped.
    pub fn close(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("[FC] Link {} closed", self.address);
        }
    }
}

#[async_trait]
impl VehicleLink for MavlinkPort {
    async fn read_message(&self) -> Result<(MavHeader, MavMessage)> {
        if !self.is_running() {
            bail!("link closed");
        }
        let connection = self.connection.clone();
        let received = tokio::task::spawn_blocking(move || connection.recv()).await?;
        received.map_err(|e| anyhow!("read error: {}", e))
    }

    async fn write_message(&self, header: &MavHeader, message: &MavMessage) -> Result<usize> {
        if !self.is_running() {
            bail!("link closed");
        }
        let connection = self.connection.clone();
        let header = *header;
        let message = message.clone();
        let written = tokio::task::spawn_blocking(move || connection.send(&header, &message)).await?;
        let written = written.map_err(|e| anyhow!("write error: {}", e))?;
        debug!("[FC] Wrote {} bytes", written);
        Ok(written)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = FcConfig::default();
        assert_eq!(config.system_id, 255);
        assert_eq!(config.target_system, 1);
        assert_eq!(config.connection.address(), "udpin:127.0.0.1:14540");
    }

    #[test]
    fn test_parse_connection_types() {
        let serial: FcConnectionType = "serial:/dev/ttyACM0:57600".parse().unwrap();
        assert_eq!(
            serial,
            FcConnectionType::Serial {
                port: "/dev/ttyACM0".into(),
                baud: 57600,
            }
        );
        assert_eq!(serial.address(), "serial:/dev/ttyACM0:57600");

        let udp: FcConnectionType = "udp:0.0.0.0:14550".parse().unwrap();
        assert!(matches!(udp, FcConnectionType::Udp { ref address } if address == "0.0.0.0:14550"));

        let tcp: FcConnectionType = "tcp:127.0.0.1:5760".parse().unwrap();
        assert_eq!(tcp.address(), "tcpout:127.0.0.1:5760");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("ttyACM0".parse::<FcConnectionType>().is_err());
        assert!("serial:/dev/ttyACM0".parse::<FcConnectionType>().is_err());
        assert!("serial:/dev/ttyACM0:fast".parse::<FcConnectionType>().is_err());
        assert!("can:vcan0".parse::<FcConnectionType>().is_err());
        assert!("udp:".parse::<FcConnectionType>().is_err());
    }
}
