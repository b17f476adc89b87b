//! Vehicle link plumbing

#[cfg(test)]
pub mod mock;
pub mod traits;

pub use traits::VehicleLink;

use mavlink::ardupilotmega::MavMessage;
use mavlink::MavHeader;
use tracing::warn;

use crate::error::BridgeError;

/// Write one message and turn a failed or empty write into a typed error
///
/// The failure is also logged, so callers that treat it as non-fatal can
/// simply drop the error.
pub async fn transmit(
    link: &dyn VehicleLink,
    header: &MavHeader,
    message: &MavMessage,
    what: &'static str,
) -> Result<usize, BridgeError> {
    match link.write_message(header, message).await {
        Ok(0) => {
            warn!("[FC] Could not send {}: nothing written", what);
            Err(BridgeError::WriteFailed {
                what,
                reason: "0 bytes written".into(),
            })
        }
        Ok(written) => Ok(written),
        Err(e) => {
            warn!("[FC] Could not send {}: {}", what, e);
            Err(BridgeError::WriteFailed {
                what,
                reason: e.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockLink;
    use super::*;
    use mavlink::ardupilotmega::HEARTBEAT_DATA;

    #[tokio::test]
    async fn test_transmit_reports_failure() {
        let link = MockLink::new();
        let msg = MavMessage::HEARTBEAT(HEARTBEAT_DATA::default());

        let written = transmit(&link, &MavHeader::default(), &msg, "heartbeat")
            .await
            .unwrap();
        assert!(written > 0);

        link.set_fail_writes(true);
        let result = transmit(&link, &MavHeader::default(), &msg, "heartbeat").await;
        assert!(matches!(result, Err(BridgeError::WriteFailed { what: "heartbeat", .. })));
    }
}
