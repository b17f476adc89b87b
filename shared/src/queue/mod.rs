//! Named message queues
//!
//! A queue is identified by a [`QueueId`] and owned by exactly one process,
//! which is the only one allowed to receive from it. Anyone may post to it.
//! Every queue is bounded: an entry occupies a slot from the moment it is
//! posted until the receiver releases it.
//!
//! Two backends implement [`MessageQueue`]:
//! - [`LocalQueues`]: all queues in one process (tests, single-process setups)
//! - [`SocketQueues`]: one queue per process, reached over Unix sockets

mod local;
mod mailbox;
mod socket;

pub use local::LocalQueues;
pub use socket::SocketQueues;

use async_trait::async_trait;
use bytes::Bytes;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OwnedSemaphorePermit;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, warn};

use crate::codec::CodecError;
use crate::timing;
use crate::{IpcPacket, PacketKind, Priority, QueueId};

/// Default number of entries a queue can hold
pub const DEFAULT_QUEUE_DEPTH: usize = 5;

/// Errors reported by the queue subsystem
#[derive(Error, Debug)]
pub enum QueueError {
    /// The target queue exists in the configuration but is not reachable yet
    #[error("queue {0} not ready")]
    NotReady(QueueId),

    #[error("queue {0} is full")]
    Full(QueueId),

    #[error("queue {0} is not known to this process")]
    UnknownQueue(QueueId),

    #[error("queue {0} is owned by another process")]
    NotOwned(QueueId),

    #[error("no entry on queue {queue} within {waited:?}")]
    Timeout { queue: QueueId, waited: Duration },

    #[error("queue {0} closed")]
    Closed(QueueId),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QueueError {
    /// Whether this outcome is expected while the subsystem is still coming up
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueueError::NotReady(_) | QueueError::Full(_))
    }
}

/// How long `receive` may block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeout {
    /// Block until an entry arrives
    Forever,
    /// Give up after the duration
    After(Duration),
}

/// A received entry. It holds its queue slot until released.
#[derive(Debug)]
pub struct QueueEntry {
    queue: QueueId,
    packet: IpcPacket,
    _slot: OwnedSemaphorePermit,
}

impl QueueEntry {
    pub(crate) fn new(queue: QueueId, packet: IpcPacket, slot: OwnedSemaphorePermit) -> Self {
        Self {
            queue,
            packet,
            _slot: slot,
        }
    }

    /// Queue this entry was received from
    pub fn queue(&self) -> QueueId {
        self.queue
    }

    pub fn packet(&self) -> &IpcPacket {
        &self.packet
    }

    pub fn kind(&self) -> PacketKind {
        self.packet.packet_kind()
    }

    /// Give the slot back to the queue
    pub fn release(self) {
        debug!("[IPC] Released entry on {}", self.queue);
    }
}

/// The queue contract used by the GPS relay and the producer
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Post a packet to `queue`, asking for replies on `reply_to`
    async fn send(
        &self,
        queue: QueueId,
        priority: Priority,
        kind: PacketKind,
        reply_to: QueueId,
        payload: Bytes,
    ) -> Result<(), QueueError>;

    /// Take the next entry from a queue this process owns
    async fn receive(&self, queue: QueueId, timeout: RecvTimeout) -> Result<QueueEntry, QueueError>;

    /// Free a consumed entry
    fn release(&self, entry: QueueEntry) {
        entry.release();
    }
}

/// Retry schedule for bringing the queue subsystem up
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub backoff: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_millis(timing::QUEUE_INIT_BACKOFF_MS),
            max_attempts: timing::QUEUE_INIT_MAX_ATTEMPTS,
        }
    }
}

/// Run `op` until it succeeds, retrying "not ready" outcomes on a fixed backoff
///
/// Non-retryable errors are returned immediately. When the attempts run out
/// the last error is returned.
pub async fn retry_until_ready<T, F, Fut>(
    what: &str,
    policy: RetryPolicy,
    mut op: F,
) -> Result<T, QueueError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, QueueError>>,
{
    let mut ticker = interval(policy.backoff);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut attempt = 0;

    loop {
        ticker.tick().await;
        attempt += 1;

        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("[IPC] {} ready after {} attempts", what, attempt);
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_attempts.max(1) => {
                warn!("[IPC] {} not ready ({}), retrying...", what, e);
            }
            Err(e) => return Err(e),
        }
    }
}
