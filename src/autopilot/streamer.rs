//! Setpoint Streamer Loop
//!
//! Keeps the autopilot in off-board mode by sending the current setpoint at
//! a fixed period that stays below the autopilot's off-board timeout.

use offboard_shared::timing;
use std::sync::Arc;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use super::setpoint::Setpoint;
use crate::context::{BridgeContext, WriterStatus};
use crate::error::Result;
use crate::transport::{transmit, VehicleLink};

/// Setpoint streaming period
pub const SETPOINT_PERIOD: Duration = Duration::from_millis(timing::SETPOINT_PERIOD_MS);

/// Run the streamer until the stop token fires
pub async fn run_streamer(ctx: Arc<BridgeContext>, link: Arc<dyn VehicleLink>) {
    let stop = ctx.run_state.stop_token();

    ctx.run_state.set_writer_status(WriterStatus::Starting);
    if let Err(e) = ctx.setpoint.update(Setpoint::hold()).await {
        error!("[STREAMER] Could not install hold setpoint: {}", e);
    }

    // One immediate write so the autopilot sees a setpoint before the mode switch
    let mut failed_writes = 0u32;
    if write_setpoint(&ctx, link.as_ref()).await.is_err() {
        failed_writes += 1;
    }
    ctx.run_state.set_writer_status(WriterStatus::Streaming);
    info!("[STREAMER] Streaming setpoints every {:?}", SETPOINT_PERIOD);

    let mut ticker = interval_at(Instant::now() + SETPOINT_PERIOD, SETPOINT_PERIOD);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                match write_setpoint(&ctx, link.as_ref()).await {
                    Ok(_) if failed_writes > 0 => {
                        info!("[STREAMER] Link recovered after {} failed writes", failed_writes);
                        failed_writes = 0;
                    }
                    Ok(_) => {}
                    Err(_) => {
                        failed_writes += 1;
                        if failed_writes * timing::SETPOINT_PERIOD_MS as u32
                            >= timing::OFFBOARD_SETPOINT_TIMEOUT_MS as u32
                        {
                            warn!(
                                "[STREAMER] {} consecutive failed writes, autopilot may leave off-board mode",
                                failed_writes
                            );
                        }
                    }
                }
            }
        }
    }

    ctx.run_state.set_writer_status(WriterStatus::Idle);
    info!("[STREAMER] Setpoint streamer stopped");
}

/// Copy the current setpoint out of the cell, stamp it and send it
///
/// The cell lock is released before the write.
pub async fn write_setpoint(ctx: &BridgeContext, link: &dyn VehicleLink) -> Result<usize> {
    let setpoint = ctx.setpoint.current().await;
    let (target_system, target_component) = ctx.targets();
    let message = setpoint.to_message(target_system, target_component, ctx.time_boot_ms());
    transmit(link, &ctx.header(), &message, "setpoint").await
}
