//! In-process queue backend

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use tracing::trace;

use super::mailbox::Mailbox;
use super::{MessageQueue, QueueEntry, QueueError, RecvTimeout, DEFAULT_QUEUE_DEPTH};
use crate::{IpcPacket, PacketKind, Priority, QueueId};

/// All named queues living in one process
pub struct LocalQueues {
    mailboxes: HashMap<QueueId, Mailbox>,
}

impl LocalQueues {
    /// Create the given queues, each holding `depth` entries
    pub fn new(ids: &[QueueId], depth: usize) -> Self {
        let mailboxes = ids.iter().map(|&id| (id, Mailbox::new(id, depth))).collect();
        Self { mailboxes }
    }

    /// The bridge/producer pair with default depth
    pub fn gps_pair() -> Self {
        Self::new(&[QueueId::Mavlink, QueueId::Gps], DEFAULT_QUEUE_DEPTH)
    }

    /// Free slots on a queue
    pub fn available(&self, queue: QueueId) -> Option<usize> {
        self.mailboxes.get(&queue).map(Mailbox::available)
    }

    fn mailbox(&self, queue: QueueId) -> Result<&Mailbox, QueueError> {
        self.mailboxes
            .get(&queue)
            .ok_or(QueueError::UnknownQueue(queue))
    }
}

#[async_trait]
impl MessageQueue for LocalQueues {
    async fn send(
        &self,
        queue: QueueId,
        priority: Priority,
        kind: PacketKind,
        reply_to: QueueId,
        payload: Bytes,
    ) -> Result<(), QueueError> {
        trace!("[IPC] {:?} -> {} (reply to {})", kind, queue, reply_to);
        self.mailbox(queue)?
            .try_post(IpcPacket::new(kind, priority, reply_to, payload))
    }

    async fn receive(&self, queue: QueueId, timeout: RecvTimeout) -> Result<QueueEntry, QueueError> {
        self.mailbox(queue)?.take(timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GpsRequest;

    #[tokio::test]
    async fn test_request_reaches_target_queue() {
        let queues = LocalQueues::gps_pair();
        queues
            .send(
                QueueId::Gps,
                Priority::Normal,
                PacketKind::GpsRequest,
                QueueId::Mavlink,
                GpsRequest { num: 3 }.payload(),
            )
            .await
            .unwrap();

        assert_eq!(queues.available(QueueId::Gps), Some(DEFAULT_QUEUE_DEPTH - 1));
        assert_eq!(queues.available(QueueId::Mavlink), Some(DEFAULT_QUEUE_DEPTH));

        let entry = queues.receive(QueueId::Gps, RecvTimeout::Forever).await.unwrap();
        assert_eq!(entry.kind(), PacketKind::GpsRequest);
        assert_eq!(entry.packet().reply_queue(), QueueId::Mavlink);
        assert_eq!(GpsRequest::from_payload(&entry.packet().payload).unwrap().num, 3);

        queues.release(entry);
        assert_eq!(queues.available(QueueId::Gps), Some(DEFAULT_QUEUE_DEPTH));
    }

    #[tokio::test]
    async fn test_unknown_queue() {
        let queues = LocalQueues::new(&[QueueId::Gps], 1);
        let result = queues
            .send(QueueId::Mavlink, Priority::Normal, PacketKind::GpsResponse, QueueId::Gps, Bytes::new())
            .await;
        assert!(matches!(result, Err(QueueError::UnknownQueue(QueueId::Mavlink))));
    }
}
