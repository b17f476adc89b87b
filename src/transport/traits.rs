//! Vehicle link abstraction

use anyhow::Result;
use async_trait::async_trait;
use mavlink::ardupilotmega::MavMessage;
use mavlink::MavHeader;

/// A link that carries decoded MAVLink messages to and from the autopilot
#[async_trait]
pub trait VehicleLink: Send + Sync {
    /// Block until the next message arrives
    async fn read_message(&self) -> Result<(MavHeader, MavMessage)>;

    /// Send one message, returning the number of bytes written
    async fn write_message(&self, header: &MavHeader, message: &MavMessage) -> Result<usize>;

    /// Whether the link is open
    fn is_running(&self) -> bool;
}
