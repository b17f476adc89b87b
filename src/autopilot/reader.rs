//! Telemetry Reader Loop
//!
//! Pulls one message at a time off the link and files it in the telemetry
//! store until a stop is requested.

use mavlink::ardupilotmega::MavMessage;
use offboard_shared::{now_usec, timing};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, trace, warn};

use super::telemetry::{MessageKind, ReceiptTracker};
use crate::context::BridgeContext;
use crate::transport::VehicleLink;

/// Run the reader until the stop token fires
pub async fn run_reader(ctx: Arc<BridgeContext>, link: Arc<dyn VehicleLink>) {
    let stop = ctx.run_state.stop_token();
    let mut tracker = ReceiptTracker::new();

    ctx.run_state.set_reading(true);
    info!("[READER] Telemetry reader started");

    loop {
        let received = tokio::select! {
            _ = stop.cancelled() => break,
            received = link.read_message() => received,
        };

        match received {
            Ok((header, message)) => {
                ctx.telemetry.learn_identity(&header);

                match ctx.telemetry.record(&message, now_usec()).await {
                    Some(kind) => {
                        if let MavMessage::COMMAND_ACK(ack) = &message {
                            info!("[READER] COMMAND_ACK {:?}: {:?}", ack.command, ack.result);
                        }
                        if tracker.mark(kind) {
                            ctx.run_state.set_all_received();
                            info!("[READER] Full telemetry snapshot received");
                        }
                    }
                    None => trace!("[READER] Ignoring untracked message"),
                }
            }
            Err(e) => {
                warn!("[READER] Receive failed: {}", e);
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = sleep(Duration::from_millis(timing::READER_ERROR_BACKOFF_MS)) => {}
                }
            }
        }

        // Let the streamer have the link while it is writing
        if ctx.run_state.is_writing() {
            sleep(Duration::from_micros(timing::READER_YIELD_US)).await;
        }
    }

    if !tracker.is_complete() {
        let missing: Vec<_> = tracker.missing().iter().map(|k| k.as_str()).collect();
        debug!("[READER] Never received: {:?}", missing);
    }

    ctx.run_state.set_reading(false);
    info!("[READER] Telemetry reader stopped");
}

/// Whether every streamed kind has been seen at least once
pub fn snapshot_complete(ctx: &BridgeContext) -> bool {
    ctx.run_state.all_received()
}

/// Kinds a startup gate waits for before recording the initial position
pub const INITIAL_POSITION_KINDS: [MessageKind; 2] =
    [MessageKind::LocalPositionNed, MessageKind::Attitude];
