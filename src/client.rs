//! Client struct definition
//!
//! Represents a registered client: its handle, the writable side of its
//! socket, and when it joined.

use std::time::{Duration, Instant};

use crate::connection::Connection;
use crate::error::SendError;
use crate::message::ServerMessage;
use crate::types::{ConnectionId, Handle};

/// Registered client information
///
/// Shared as `Arc<Client>` between the registry and the owning session.
#[derive(Debug)]
pub struct Client {
    /// Unique handle chosen at handshake
    pub handle: Handle,
    /// Server → Client socket writer
    pub connection: Connection,
    /// Handshake completion time
    pub connected_at: Instant,
}

impl Client {
    /// Create a client from a completed handshake
    pub fn new(handle: Handle, connection: Connection) -> Self {
        Self {
            handle,
            connection,
            connected_at: Instant::now(),
        }
    }

    /// Identity of the session behind this client
    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    /// Send a message to this client
    ///
    /// Returns an error if the connection is closed or the write fails.
    pub async fn send(&self, msg: &ServerMessage) -> Result<(), SendError> {
        self.connection.send(msg).await
    }

    /// Idle liveness check, see `Connection::probe`
    pub async fn probe(&self) -> Result<(), SendError> {
        self.connection.probe().await
    }

    /// Shut down the socket; idempotent
    pub async fn close(&self) {
        self.connection.close().await;
    }

    /// Time since the handshake completed
    pub fn connected_for(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
