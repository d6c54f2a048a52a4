//! Per-connection session
//!
//! Drives one client from handshake to teardown:
//! `Handshaking → Active → Closing → Closed`. The registry entry is held
//! through a `Registration` guard, so it is released on every exit path
//! including panics and task aborts.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, error, info, warn};

use crate::client::Client;
use crate::codec::{FrameDecoder, Framing};
use crate::config::Config;
use crate::connection::Connection;
use crate::error::ChatError;
use crate::message::ServerMessage;
use crate::registry::{Registration, Registry};
use crate::router::Router;
use crate::types::Handle;

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Handshaking,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    /// Whether `self -> next` is an edge of the lifecycle
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::{Active, Closed, Closing, Handshaking};
        matches!(
            (self, next),
            (Handshaking, Active) | (Handshaking, Closed) | (Active, Closing) | (Closing, Closed)
        )
    }
}

/// Per-session limits, taken from `Config`
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub idle_timeout: Duration,
    pub read_buffer_size: usize,
    pub framing: Framing,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SessionOptions {
    fn from(config: &Config) -> Self {
        Self {
            idle_timeout: config.idle_timeout(),
            read_buffer_size: config.read_buffer_size,
            framing: config.framing,
        }
    }
}

pub struct Session<R> {
    reader: R,
    registry: Arc<Registry>,
    router: Router,
    options: SessionOptions,
    decoder: FrameDecoder,
    /// Frames that arrived in the same read as the handshake
    backlog: VecDeque<String>,
    state: SessionState,
    /// Remote address for logs, `unknown` until set
    peer: String,
}

impl<R> Session<R>
where
    R: AsyncRead + Unpin,
{
    /// A session in `Handshaking` that will read from `reader`
    pub fn new(reader: R, registry: Arc<Registry>, options: SessionOptions) -> Self {
        Self {
            reader,
            router: Router::new(Arc::clone(&registry)),
            registry,
            decoder: FrameDecoder::new(options.framing, options.read_buffer_size),
            options,
            backlog: VecDeque::new(),
            state: SessionState::Handshaking,
            peer: "unknown".to_string(),
        }
    }

    /// Label log lines with the remote address
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = peer.to_string();
        self
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run the session to completion
    ///
    /// Returns an error only for unexpected IO failures; rejected handshakes
    /// and disconnects are normal outcomes.
    pub async fn run(mut self, connection: Connection) -> Result<(), ChatError> {
        let mut buf = vec![0u8; self.options.read_buffer_size];

        let registration = match self.handshake(connection, &mut buf).await {
            Ok(registration) => registration,
            Err(err) => {
                self.transition(SessionState::Closed);
                return unexpected(err);
            }
        };

        self.transition(SessionState::Active);
        let client = Arc::clone(registration.client());
        self.activate(&client).await;

        let reason = self.serve(&client, &mut buf).await;

        self.transition(SessionState::Closing);
        self.close(registration, &reason).await;
        self.transition(SessionState::Closed);

        unexpected(reason)
    }

    /// Read the handle and register it
    ///
    /// The connection is closed here on every failure path.
    async fn handshake(
        &mut self,
        connection: Connection,
        buf: &mut [u8],
    ) -> Result<Registration, ChatError> {
        // Line framing may need several reads before the first line is complete
        let mut frames = loop {
            match self.next_frames(buf).await {
                Ok(frames) if frames.is_empty() => continue,
                Ok(frames) => break frames,
                Err(err) => {
                    debug!("Handshake aborted: {}", err);
                    connection.close().await;
                    return Err(err);
                }
            }
        };
        let first = frames.pop_front().unwrap_or_default();
        self.backlog = frames;

        let handle = match Handle::parse(&first) {
            Ok(handle) => handle,
            Err(err) => {
                warn!("Empty username received from {}", self.peer);
                let _ = connection.send(&ServerMessage::from(&err)).await;
                connection.close().await;
                return Err(err);
            }
        };

        let client = Arc::new(Client::new(handle, connection));
        match Registration::acquire(Arc::clone(&self.registry), Arc::clone(&client)) {
            Ok(registration) => Ok(registration),
            Err(err) => {
                warn!(
                    "Duplicate username rejected: {} from {}",
                    client.handle, self.peer
                );
                let _ = client.send(&ServerMessage::from(&err)).await;
                client.close().await;
                Err(err)
            }
        }
    }

    /// Welcome, join notice, command summary
    async fn activate(&self, client: &Arc<Client>) {
        let welcome = ServerMessage::Welcome {
            handle: client.handle.clone(),
        };
        if let Err(err) = client.send(&welcome).await {
            debug!("Welcome to {} failed: {}", client.handle, err);
        }
        self.router.announce_join(&client.handle).await;
        if let Err(err) = client.send(&ServerMessage::Help).await {
            debug!("Command summary to {} failed: {}", client.handle, err);
        }
    }

    /// Active read loop; returns why the session is ending
    async fn serve(&mut self, client: &Arc<Client>, buf: &mut [u8]) -> ChatError {
        let mut frames = std::mem::take(&mut self.backlog);
        loop {
            while let Some(frame) = frames.pop_front() {
                let line = frame.trim();
                if !line.is_empty() {
                    self.router.route(client, line).await;
                }
            }

            match self.next_frames(buf).await {
                Ok(next) => frames = next,
                Err(ChatError::IdleTimeout) => {
                    if let Err(err) = client.probe().await {
                        warn!("Connection timeout for {}: {}", client.handle, err);
                        return ChatError::IdleTimeout;
                    }
                    debug!("{} idle, probe ok", client.handle);
                }
                Err(err) => return err,
            }
        }
    }

    /// Unregister, announce, close. Safe to reach from any exit of `serve`.
    async fn close(&self, registration: Registration, reason: &ChatError) {
        let client = Arc::clone(registration.client());
        match reason {
            ChatError::PeerClosed => debug!("{} closed the connection", client.handle),
            ChatError::PeerReset => warn!("Connection reset by {}", client.handle),
            ChatError::IdleTimeout => warn!("{} timed out", client.handle),
            other => error!("Error receiving from {}: {}", client.handle, other),
        }

        // False when broadcast cleanup or shutdown already removed us
        if registration.release() {
            let _ = client.send(&ServerMessage::ConnectionClosed).await;
            self.router.announce_leave(&client.handle).await;
        }
        client.close().await;

        info!(
            "Connection closed for {} after {:.1}s",
            client.handle,
            client.connected_for().as_secs_f64()
        );
    }

    /// One bounded read turned into frames
    async fn next_frames(&mut self, buf: &mut [u8]) -> Result<VecDeque<String>, ChatError> {
        match tokio::time::timeout(self.options.idle_timeout, self.reader.read(buf)).await {
            Err(_elapsed) => Err(ChatError::IdleTimeout),
            Ok(Ok(0)) => Err(ChatError::PeerClosed),
            Ok(Ok(n)) => Ok(self.decoder.decode(&buf[..n]).into()),
            Ok(Err(err)) => Err(ChatError::from_read(err)),
        }
    }

    fn transition(&mut self, next: SessionState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid session transition {:?} -> {:?}",
            self.state,
            next
        );
        debug!("session {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

/// Only IO failures are worth surfacing to the acceptor
fn unexpected(outcome: ChatError) -> Result<(), ChatError> {
    match outcome {
        ChatError::Io(_) => Err(outcome),
        _ => Ok(()),
    }
}
