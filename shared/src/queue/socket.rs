//! Cross-process queue backend over Unix domain sockets
//!
//! Each process binds the queue it owns as `<dir>/<name>.sock` and accepts
//! connections from peers. Frames coming in on any connection are posted into
//! the owned mailbox; a full mailbox applies backpressure to the socket.
//! Sending to a peer lazily connects to the peer's socket and keeps the
//! connection for later sends.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use super::mailbox::Mailbox;
use super::{MessageQueue, QueueEntry, QueueError, RecvTimeout};
use crate::codec::{CodecError, IpcCodec};
use crate::{IpcPacket, PacketKind, Priority, QueueId};

type PeerWriter = FramedWrite<UnixStream, IpcCodec>;

/// Socket path for a queue inside `dir`
pub fn socket_path(dir: &Path, queue: QueueId) -> PathBuf {
    dir.join(format!("{}.sock", queue.name()))
}

/// One owned queue, reachable by peers over a Unix socket
pub struct SocketQueues {
    dir: PathBuf,
    owned: QueueId,
    path: PathBuf,
    mailbox: Arc<Mailbox>,
    peers: Mutex<HashMap<QueueId, PeerWriter>>,
    accept_task: JoinHandle<()>,
}

impl SocketQueues {
    /// Bind the queue this process owns. Must be called inside a runtime.
    ///
    /// A stale socket left behind by a previous run is removed first; any
    /// other file at that path is an error.
    pub fn bind(dir: impl AsRef<Path>, owned: QueueId, depth: usize) -> Result<Self, QueueError> {
        if owned == QueueId::Null {
            return Err(QueueError::UnknownQueue(owned));
        }

        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        let path = socket_path(&dir, owned);

        if let Ok(metadata) = std::fs::symlink_metadata(&path) {
            if metadata.file_type().is_socket() {
                debug!("[IPC] Removing stale socket {:?}", path);
                std::fs::remove_file(&path)?;
            } else {
                return Err(QueueError::Io(std::io::Error::new(
                    ErrorKind::AlreadyExists,
                    format!("{} exists and is not a socket", path.display()),
                )));
            }
        }

        let listener = UnixListener::bind(&path)?;
        let mailbox = Arc::new(Mailbox::new(owned, depth));
        let accept_task = tokio::spawn(accept_loop(listener, mailbox.clone()));

        info!("[IPC] Queue {} listening on {:?}", owned, path);

        Ok(Self {
            dir,
            owned,
            path,
            mailbox,
            peers: Mutex::new(HashMap::new()),
            accept_task,
        })
    }

    /// Queue owned by this process
    pub fn owned(&self) -> QueueId {
        self.owned
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check that a peer queue is reachable, connecting if needed
    pub async fn probe(&self, peer: QueueId) -> Result<(), QueueError> {
        let mut peers = self.peers.lock().await;
        if !peers.contains_key(&peer) {
            let writer = self.connect(peer).await?;
            peers.insert(peer, writer);
        }
        Ok(())
    }

    async fn connect(&self, peer: QueueId) -> Result<PeerWriter, QueueError> {
        if peer == QueueId::Null {
            return Err(QueueError::UnknownQueue(peer));
        }

        let path = socket_path(&self.dir, peer);
        match UnixStream::connect(&path).await {
            Ok(stream) => {
                debug!("[IPC] Connected to queue {} at {:?}", peer, path);
                Ok(FramedWrite::new(stream, IpcCodec))
            }
            Err(e) if is_not_ready(&e) => Err(QueueError::NotReady(peer)),
            Err(e) => Err(QueueError::Io(e)),
        }
    }
}

fn is_not_ready(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::NotFound
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::BrokenPipe
    )
}

async fn accept_loop(listener: UnixListener, mailbox: Arc<Mailbox>) {
    // Readers live in the set so aborting this task tears them down too
    let mut readers = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => {
                    debug!("[IPC] Peer connected");
                    readers.spawn(read_peer(stream, mailbox.clone()));
                }
                Err(e) => {
                    warn!("[IPC] Accept failed: {}", e);
                }
            },
            Some(_) = readers.join_next(), if !readers.is_empty() => {}
        }
    }
}

async fn read_peer(stream: UnixStream, mailbox: Arc<Mailbox>) {
    let mut frames = FramedRead::new(stream, IpcCodec);

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(packet) => {
                if let Err(e) = mailbox.post(packet).await {
                    warn!("[IPC] Dropping inbound packet: {}", e);
                    break;
                }
            }
            Err(CodecError::Io(e)) if is_not_ready(&e) => break,
            Err(e) => {
                warn!("[IPC] Bad frame from peer, closing connection: {}", e);
                break;
            }
        }
    }

    debug!("[IPC] Peer disconnected");
}

#[async_trait]
impl MessageQueue for SocketQueues {
    async fn send(
        &self,
        queue: QueueId,
        priority: Priority,
        kind: PacketKind,
        reply_to: QueueId,
        payload: Bytes,
    ) -> Result<(), QueueError> {
        let packet = IpcPacket::new(kind, priority, reply_to, payload);

        if queue == self.owned {
            return self.mailbox.try_post(packet);
        }

        let mut peers = self.peers.lock().await;
        let mut writer = match peers.remove(&queue) {
            Some(writer) => writer,
            None => self.connect(queue).await?,
        };

        match writer.send(packet).await {
            Ok(()) => {
                peers.insert(queue, writer);
                Ok(())
            }
            // Connection dropped: the peer restarted or went away. Reconnect next time.
            Err(CodecError::Io(e)) if is_not_ready(&e) => Err(QueueError::NotReady(queue)),
            Err(e) => Err(e.into()),
        }
    }

    async fn receive(&self, queue: QueueId, timeout: RecvTimeout) -> Result<QueueEntry, QueueError> {
        if queue != self.owned {
            return Err(QueueError::NotOwned(queue));
        }
        self.mailbox.take(timeout).await
    }
}

impl Drop for SocketQueues {
    fn drop(&mut self) {
        self.accept_task.abort();

        if let Ok(metadata) = std::fs::symlink_metadata(&self.path) {
            if metadata.file_type().is_socket() {
                debug!("[IPC] Cleaning up socket {:?}", self.path);
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }
}
