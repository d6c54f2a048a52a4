//! Writable side of one client socket
//!
//! The read half stays with the owning session; the write half lives here so
//! that the router can deliver to any registered client. Writes are
//! serialized per connection by an async mutex, never by the registry lock.
//! Closing flips a watch flag first, so a write stuck on a peer that stopped
//! reading gives up its lock instead of blocking the close.

use std::time::Duration;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::codec::Framing;
use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::ConnectionId;

/// Upper bound for taking the writer and shutting it down on close
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

pub struct Connection {
    id: ConnectionId,
    framing: Framing,
    /// `None` once closed; later writes fail with `SendError::Closed`
    writer: Mutex<Option<BoxedWriter>>,
    closed: watch::Sender<bool>,
}

impl Connection {
    /// Wrap the write half of a client socket
    pub fn new<W>(id: ConnectionId, framing: Framing, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (closed, _) = watch::channel(false);
        Self {
            id,
            framing,
            writer: Mutex::new(Some(Box::new(writer))),
            closed,
        }
    }

    /// Identity of the session that owns this socket
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Encode and write one message
    pub async fn send(&self, msg: &ServerMessage) -> Result<(), SendError> {
        let bytes = self.framing.encode(&msg.to_string());
        self.write_frame(&bytes).await
    }

    /// Zero-length write used as a liveness probe
    ///
    /// Many platforms accept this even on a dead peer, so success does not
    /// prove the peer is alive.
    pub async fn probe(&self) -> Result<(), SendError> {
        self.write_frame(&[]).await
    }

    async fn write_frame(&self, bytes: &[u8]) -> Result<(), SendError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(SendError::Closed);
        }

        let write = async {
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or(SendError::Closed)?;
            if bytes.is_empty() {
                let _written = writer.write(bytes).await?;
            } else {
                writer.write_all(bytes).await?;
            }
            writer.flush().await?;
            Ok::<(), SendError>(())
        };

        tokio::select! {
            result = write => result,
            _ = async { let _ = closed.wait_for(|closed| *closed).await; } => {
                Err(SendError::Closed)
            }
        }
    }

    /// Shut down and release the writer. Idempotent and time-bounded.
    ///
    /// Pending writes are cancelled. If the writer still cannot be taken in
    /// time it is left to be dropped with the connection.
    pub async fn close(&self) {
        self.closed.send_replace(true);

        let writer = match tokio::time::timeout(CLOSE_TIMEOUT, self.writer.lock()).await {
            Ok(mut guard) => guard.take(),
            Err(_) => {
                debug!("Writer for {} still busy, dropping without shutdown", self.id);
                return;
            }
        };
        if let Some(mut writer) = writer {
            let _ = tokio::time::timeout(CLOSE_TIMEOUT, writer.shutdown()).await;
        }
    }

    /// True once `close` has started
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("framing", &self.framing)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_send_then_close() {
        let (mut peer, local) = tokio::io::duplex(1024);
        let conn = Connection::new(ConnectionId::new(), Framing::Line, local);

        conn.send(&ServerMessage::ShuttingDown).await.unwrap();
        conn.close().await;
        conn.close().await;
        assert!(conn.is_closed());
        assert!(matches!(
            conn.send(&ServerMessage::ShuttingDown).await,
            Err(SendError::Closed)
        ));

        let mut received = String::new();
        peer.read_to_string(&mut received).await.unwrap();
        assert_eq!(received, "[SERVER] Server is shutting down\n");
    }

    #[tokio::test]
    async fn test_write_to_dropped_peer_fails() {
        let (peer, local) = tokio::io::duplex(1024);
        let conn = Connection::new(ConnectionId::new(), Framing::Raw, local);
        drop(peer);

        assert!(matches!(
            conn.send(&ServerMessage::Help).await,
            Err(SendError::Io(_))
        ));
    }

    #[tokio::test]
    async fn test_close_interrupts_stalled_write() {
        // Pipe too small for the message; the peer never reads
        let (_peer, local) = tokio::io::duplex(8);
        let conn = Arc::new(Connection::new(ConnectionId::new(), Framing::Line, local));

        let writer = Arc::clone(&conn);
        let pending = tokio::spawn(async move { writer.send(&ServerMessage::Help).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!pending.is_finished());

        tokio::time::timeout(Duration::from_secs(2), conn.close())
            .await
            .expect("close blocked on a stalled write");
        assert!(conn.is_closed());
        assert!(matches!(pending.await.unwrap(), Err(SendError::Closed)));
    }
}
