use anyhow::{Context, Result};
use offboard_bridge::autopilot::{CommandDispatcher, FcConfig, MavlinkPort, MessageInterval};
use offboard_bridge::context::BridgeContext;
use offboard_bridge::error::BridgeError;
use offboard_bridge::gps::{GpsForwardFormat, GpsRelay, RelayConfig};
use offboard_bridge::lifecycle::{BridgeController, StartupOptions};
use offboard_shared::queue::{retry_until_ready, RetryPolicy, SocketQueues, DEFAULT_QUEUE_DEPTH};
use offboard_shared::{now_usec, QueueId};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const IPC_DIR_ENV: &str = "OFFBOARD_IPC_DIR";
const DEFAULT_IPC_DIR: &str = "/tmp/offboard-bridge";
const GPS_RATE_ENV: &str = "OFFBOARD_GPS_RATE_HZ";
const GPS_FORMAT_ENV: &str = "OFFBOARD_GPS_FORMAT";

/// Rate requested for each streamed telemetry kind
const TELEMETRY_STREAM_INTERVAL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let fc_config = FcConfig::from_env()?;
    let ipc_dir = std::env::var(IPC_DIR_ENV).unwrap_or_else(|_| DEFAULT_IPC_DIR.into());
    let gps_period = gps_period()?;
    let relay_config = RelayConfig {
        format: gps_format()?,
        ..Default::default()
    };

    info!("Off-board bridge starting");
    info!("  Flight controller: {}", fc_config.connection.address());
    info!("  IPC directory: {}", ipc_dir);
    info!("  GPS relay period: {:?}", gps_period);
    info!("  GPS forward format: {}", relay_config.format.name());

    let port = Arc::new(MavlinkPort::open(&fc_config)?);
    let ctx = Arc::new(BridgeContext::new(fc_config));
    let dispatcher = CommandDispatcher::new(ctx.clone(), port.clone());
    let controller = BridgeController::new(ctx.clone(), port.clone(), StartupOptions::default());

    // Ctrl-C only raises the stop flag; the main flow does the quit sequence
    let quit_ctx = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("[MAIN] Ctrl-C received");
            quit_ctx.run_state.request_stop();
        }
    });

    // Streams first, so the telemetry the startup gates wait for is flowing
    if let Err(e) = dispatcher
        .request_telemetry_streams(MessageInterval::Every(TELEMETRY_STREAM_INTERVAL))
        .await
    {
        warn!("[MAIN] Telemetry stream request failed: {}", e);
    }

    match controller.start().await {
        Ok(()) => {
            if let Err(e) = dispatcher.request_autopilot_capabilities().await {
                warn!("[MAIN] Capability request failed: {}", e);
            }
            if let Err(e) = dispatcher.enable_offboard_control().await {
                error!("[MAIN] Failed to enter off-board mode: {}", e);
            }
            let relayed = run_gps_relay(&ctx, port.clone(), relay_config, &ipc_dir, gps_period).await;
            if let Err(e) = relayed {
                error!("[MAIN] GPS relay stopped: {:#}", e);
            }
        }
        Err(BridgeError::Cancelled) => info!("[MAIN] Startup cancelled"),
        Err(e) => error!("[MAIN] Startup failed: {}", e),
    }

    let result = controller.handle_quit(&dispatcher).await;
    if controller.can_close_transport().await {
        port.close();
    } else {
        warn!("[MAIN] Bridge not stopped cleanly, leaving the link open");
    }
    result.context("bridge shutdown")?;

    info!("Off-board bridge stopped");
    Ok(())
}

fn gps_period() -> Result<Duration> {
    let rate = match std::env::var(GPS_RATE_ENV) {
        Ok(rate) => rate
            .parse::<f64>()
            .with_context(|| format!("invalid {} '{}'", GPS_RATE_ENV, rate))?,
        Err(_) => 1.0,
    };
    if !rate.is_finite() || rate <= 0.0 {
        anyhow::bail!("{} must be a positive rate, got {}", GPS_RATE_ENV, rate);
    }
    Ok(Duration::from_secs_f64(1.0 / rate))
}

fn gps_format() -> Result<GpsForwardFormat> {
    match std::env::var(GPS_FORMAT_ENV) {
        Ok(format) => format
            .parse::<GpsForwardFormat>()
            .with_context(|| format!("invalid {}", GPS_FORMAT_ENV)),
        Err(_) => Ok(GpsForwardFormat::default()),
    }
}

/// Fetch and forward a GPS fix every `period` until a stop is requested
async fn run_gps_relay(
    ctx: &Arc<BridgeContext>,
    link: Arc<MavlinkPort>,
    config: RelayConfig,
    ipc_dir: &str,
    period: Duration,
) -> Result<()> {
    let policy = RetryPolicy::default();
    let queues = retry_until_ready("MAVLINK queue", policy, move || async move {
        SocketQueues::bind(ipc_dir, QueueId::Mavlink, DEFAULT_QUEUE_DEPTH)
    })
    .await
    .context("binding the MAVLINK queue")?;
    let queues = Arc::new(queues);

    retry_until_ready("GPS producer", policy, || queues.probe(QueueId::Gps))
        .await
        .context("reaching the GPS producer")?;
    info!("[MAIN] IPC ready at {}", queues.path().display());

    let relay = GpsRelay::new(ctx.clone(), link, queues, config);
    let stop = ctx.run_state.stop_token();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = ticker.tick() => {
                match relay.relay_fix(now_usec()).await {
                    Ok(_) => {}
                    Err(BridgeError::Cancelled) => break,
                    Err(e) => warn!("[MAIN] GPS relay round failed: {}", e),
                }
            }
        }
    }
    Ok(())
}
