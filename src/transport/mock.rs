//! In-memory vehicle link for tests

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use mavlink::ardupilotmega::MavMessage;
use mavlink::MavHeader;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use super::VehicleLink;

/// Pretend frame size reported for every successful write
const MOCK_FRAME_LEN: usize = 32;

/// Scripted inbound messages, recorded outbound ones
pub struct MockLink {
    inbound_tx: mpsc::UnboundedSender<(MavHeader, MavMessage)>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<(MavHeader, MavMessage)>>,
    sent: StdMutex<Vec<(Instant, MavMessage)>>,
    fail_writes: AtomicBool,
    running: AtomicBool,
}

impl MockLink {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Self {
            inbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            sent: StdMutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
            running: AtomicBool::new(true),
        }
    }

    /// A link that reports itself closed
    pub fn closed() -> Self {
        let link = Self::new();
        link.running.store(false, Ordering::SeqCst);
        link
    }

    /// Queue a message as if the autopilot had sent it
    pub fn push(&self, system_id: u8, component_id: u8, message: MavMessage) {
        let header = MavHeader {
            system_id,
            component_id,
            sequence: 0,
        };
        let _ = self.inbound_tx.send((header, message));
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Everything written so far
    pub fn sent(&self) -> Vec<MavMessage> {
        self.sent_with_times().into_iter().map(|(_, msg)| msg).collect()
    }

    pub fn sent_with_times(&self) -> Vec<(Instant, MavMessage)> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl VehicleLink for MockLink {
    async fn read_message(&self) -> Result<(MavHeader, MavMessage)> {
        let mut rx = self.inbound_rx.lock().await;
        rx.recv().await.ok_or_else(|| anyhow!("mock link closed"))
    }

    async fn write_message(&self, _header: &MavHeader, message: &MavMessage) -> Result<usize> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(anyhow!("mock write failure"));
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((Instant::now(), message.clone()));
        }
        Ok(MOCK_FRAME_LEN)
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
