//! GPS fix producer
//!
//! Owns the GPS queue and answers every GPS request with the configured fix.

use anyhow::{Context, Result};
use offboard_shared::queue::{retry_until_ready, RetryPolicy, SocketQueues, DEFAULT_QUEUE_DEPTH};
use offboard_shared::{
    GpsFix, GpsRequest, MessageQueue, PacketKind, Priority, QueueError, QueueId, RecvTimeout,
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const IPC_DIR_ENV: &str = "OFFBOARD_IPC_DIR";
const DEFAULT_IPC_DIR: &str = "/tmp/offboard-bridge";

/// What the producer serves
#[derive(Debug, Clone)]
struct ProducerConfig {
    queue: QueueId,
    fix: GpsFix,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            queue: QueueId::Gps,
            fix: GpsFix {
                time_usec: 0,
                lat: 351523041,
                lon: 1369686962,
                alt: 0,
                // Unknown accuracy, speed and course
                eph: u16::MAX as u32,
                epv: u16::MAX as u32,
                vel: u16::MAX as u32,
                cog: u16::MAX as u32,
                vn: 0,
                ve: 0,
                vd: 0,
                fix_type: 3,
                satellites_visible: 1,
            },
        }
    }
}

/// Take one entry off the producer queue and answer it if it is a request
///
/// Returns whether a fix was sent. Every entry is released.
async fn serve_once(queues: &dyn MessageQueue, config: &ProducerConfig) -> Result<bool, QueueError> {
    let entry = queues.receive(config.queue, RecvTimeout::Forever).await?;

    if entry.kind() != PacketKind::GpsRequest {
        warn!("[GPS] Ignoring {:?} packet", entry.kind());
        queues.release(entry);
        return Ok(false);
    }

    let reply_to = entry.packet().reply_queue();
    match GpsRequest::from_payload(&entry.packet().payload) {
        Ok(request) => info!("[GPS] receive_msg: {}", request.num),
        Err(e) => debug!("[GPS] Request without a readable counter: {}", e),
    }
    queues.release(entry);

    let mut fix = config.fix.clone();
    fix.time_usec = offboard_shared::now_usec();
    queues
        .send(
            reply_to,
            Priority::Normal,
            PacketKind::GpsResponse,
            config.queue,
            fix.payload(),
        )
        .await?;
    Ok(true)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let ipc_dir = std::env::var(IPC_DIR_ENV).unwrap_or_else(|_| DEFAULT_IPC_DIR.into());
    let config = ProducerConfig::default();
    let policy = RetryPolicy::default();

    let (dir, owned) = (ipc_dir.as_str(), config.queue);
    let queues = retry_until_ready("GPS queue", policy, move || async move {
        SocketQueues::bind(dir, owned, DEFAULT_QUEUE_DEPTH)
    })
    .await
    .context("binding the GPS queue")?;
    let queues = Arc::new(queues);
    info!("GPS producer listening on {}", queues.path().display());

    retry_until_ready("MAVLINK queue", policy, || queues.probe(QueueId::Mavlink))
        .await
        .context("reaching the bridge")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("GPS producer stopping");
                break;
            }
            served = serve_once(queues.as_ref(), &config) => {
                if let Err(e) = served {
                    // The bridge may be restarting; the next request reconnects
                    warn!("[GPS] Could not answer request: {}", e);
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use offboard_shared::queue::LocalQueues;

    #[tokio::test]
    async fn test_request_is_answered_with_fix() {
        let queues = LocalQueues::gps_pair();
        let config = ProducerConfig::default();
        queues
            .send(QueueId::Gps, Priority::Normal, PacketKind::GpsRequest, QueueId::Mavlink, GpsRequest { num: 7 }.payload())
            .await
            .unwrap();

        assert!(serve_once(&queues, &config).await.unwrap());

        let reply = queues
            .receive(QueueId::Mavlink, RecvTimeout::Forever)
            .await
            .unwrap();
        assert_eq!(reply.kind(), PacketKind::GpsResponse);
        assert_eq!(reply.packet().reply_queue(), QueueId::Gps);
        let fix = GpsFix::from_payload(&reply.packet().payload).unwrap();
        assert_eq!((fix.lat, fix.lon, fix.fix_type), (351523041, 1369686962, 3));
        assert!(fix.has_3d_fix());
        queues.release(reply);

        assert_eq!(queues.available(QueueId::Gps), Some(DEFAULT_QUEUE_DEPTH));
    }

    #[tokio::test]
    async fn test_other_kinds_are_released_unanswered() {
        let queues = LocalQueues::gps_pair();
        let config = ProducerConfig::default();
        queues
            .send(QueueId::Gps, Priority::Normal, PacketKind::GpsResponse, QueueId::Mavlink, Bytes::new())
            .await
            .unwrap();

        assert!(!serve_once(&queues, &config).await.unwrap());
        assert_eq!(queues.available(QueueId::Gps), Some(DEFAULT_QUEUE_DEPTH));
        assert_eq!(queues.available(QueueId::Mavlink), Some(DEFAULT_QUEUE_DEPTH));
    }
}
