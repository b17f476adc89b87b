//! Bounded two-priority mailbox backing a single named queue

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tokio::time::timeout;

use super::{QueueEntry, QueueError, RecvTimeout};
use crate::{IpcPacket, Priority, QueueId};

pub(crate) struct Mailbox {
    id: QueueId,
    slots: Arc<Semaphore>,
    high_tx: mpsc::Sender<QueueEntry>,
    normal_tx: mpsc::Sender<QueueEntry>,
    /// (high, normal); locked by the single receiver
    rx: Mutex<(mpsc::Receiver<QueueEntry>, mpsc::Receiver<QueueEntry>)>,
}

impl Mailbox {
    pub(crate) fn new(id: QueueId, depth: usize) -> Self {
        let depth = depth.max(1);
        let (high_tx, high_rx) = mpsc::channel(depth);
        let (normal_tx, normal_rx) = mpsc::channel(depth);

        Self {
            id,
            slots: Arc::new(Semaphore::new(depth)),
            high_tx,
            normal_tx,
            rx: Mutex::new((high_rx, normal_rx)),
        }
    }

    /// Post without waiting; fails with `Full` when every slot is taken
    pub(crate) fn try_post(&self, packet: IpcPacket) -> Result<(), QueueError> {
        let slot = self
            .slots
            .clone()
            .try_acquire_owned()
            .map_err(|_| QueueError::Full(self.id))?;
        self.enqueue(QueueEntry::new(self.id, packet, slot))
    }

    /// Post, waiting for a free slot
    pub(crate) async fn post(&self, packet: IpcPacket) -> Result<(), QueueError> {
        let slot = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| QueueError::Closed(self.id))?;
        self.enqueue(QueueEntry::new(self.id, packet, slot))
    }

    fn enqueue(&self, entry: QueueEntry) -> Result<(), QueueError> {
        let tx = match entry.packet().packet_priority() {
            Priority::High => &self.high_tx,
            Priority::Normal => &self.normal_tx,
        };
        // A slot is held, so the channel (same capacity) always has room
        tx.try_send(entry).map_err(|_| QueueError::Closed(self.id))
    }

    /// Take the next entry, high priority first
    pub(crate) async fn take(&self, wait: RecvTimeout) -> Result<QueueEntry, QueueError> {
        let mut rx = self.rx.lock().await;
        let (high, normal) = &mut *rx;

        let next = async {
            tokio::select! {
                biased;
                Some(entry) = high.recv() => Some(entry),
                Some(entry) = normal.recv() => Some(entry),
                else => None,
            }
        };

        let entry = match wait {
            RecvTimeout::Forever => next.await,
            RecvTimeout::After(limit) => timeout(limit, next).await.map_err(|_| {
                QueueError::Timeout {
                    queue: self.id,
                    waited: limit,
                }
            })?,
        };

        entry.ok_or(QueueError::Closed(self.id))
    }

    /// Free slots, for diagnostics
    pub(crate) fn available(&self) -> usize {
        self.slots.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PacketKind;
    use bytes::Bytes;
    use std::time::Duration;

    fn packet(kind: PacketKind, priority: Priority) -> IpcPacket {
        IpcPacket::new(kind, priority, QueueId::Mavlink, Bytes::new())
    }

    #[tokio::test]
    async fn test_slots_held_until_release() {
        let mailbox = Mailbox::new(QueueId::Gps, 2);
        mailbox.try_post(packet(PacketKind::GpsRequest, Priority::Normal)).unwrap();
        mailbox.try_post(packet(PacketKind::GpsRequest, Priority::Normal)).unwrap();
        assert!(matches!(
            mailbox.try_post(packet(PacketKind::GpsRequest, Priority::Normal)),
            Err(QueueError::Full(QueueId::Gps))
        ));

        // Receiving alone does not free the slot
        let entry = mailbox.take(RecvTimeout::Forever).await.unwrap();
        assert_eq!(mailbox.available(), 0);

        entry.release();
        assert_eq!(mailbox.available(), 1);
        mailbox.try_post(packet(PacketKind::GpsRequest, Priority::Normal)).unwrap();
    }

    #[tokio::test]
    async fn test_high_priority_first() {
        let mailbox = Mailbox::new(QueueId::Gps, 4);
        mailbox.try_post(packet(PacketKind::GpsRequest, Priority::Normal)).unwrap();
        mailbox.try_post(packet(PacketKind::GpsResponse, Priority::High)).unwrap();

        let first = mailbox.take(RecvTimeout::Forever).await.unwrap();
        assert_eq!(first.kind(), PacketKind::GpsResponse);
        let second = mailbox.take(RecvTimeout::Forever).await.unwrap();
        assert_eq!(second.kind(), PacketKind::GpsRequest);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_times_out() {
        let mailbox = Mailbox::new(QueueId::Mavlink, 1);
        let result = mailbox
            .take(RecvTimeout::After(Duration::from_millis(50)))
            .await;
        assert!(matches!(result, Err(QueueError::Timeout { .. })));
    }
}
