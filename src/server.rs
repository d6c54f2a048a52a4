//! ChatServer acceptor
//!
//! Owns the listening socket and the registry, admits connections up to
//! capacity, and spawns one session task per admitted connection.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::net::{lookup_host, TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinSet;
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::Config;
use crate::connection::Connection;
use crate::error::ChatError;
use crate::message::ServerMessage;
use crate::registry::{Registry, ServerStats};
use crate::session::{Session, SessionOptions};
use crate::types::ConnectionId;

/// How long a shutdown notice may wait on a client's socket
const NOTICE_TIMEOUT: Duration = Duration::from_secs(2);

/// The chat server
pub struct ChatServer {
    config: Config,
    listener: TcpListener,
    registry: Arc<Registry>,
    /// One task per admitted connection
    sessions: JoinSet<()>,
}

impl ChatServer {
    /// Validate `config` and bind the listening socket
    ///
    /// The backlog equals `max_clients`, and address reuse is enabled.
    pub async fn bind(config: Config) -> Result<Self, ChatError> {
        config.validate()?;

        let addr = lookup_host(config.listen_addr())
            .await?
            .next()
            .ok_or_else(|| ChatError::Config(format!("cannot resolve {}", config.listen_addr())))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(config.backlog())?;

        Ok(Self {
            config,
            listener,
            registry: Arc::new(Registry::new()),
            sessions: JoinSet::new(),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Result<SocketAddr, ChatError> {
        Ok(self.listener.local_addr()?)
    }

    /// Shared handle to the client registry
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }

    /// Accept connections until `shutdown` resolves, then shut down
    pub async fn run<F>(mut self, shutdown: F) -> ServerStats
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        info!(
            "Chat server listening on {} (capacity {}, framing {})",
            self.listener
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| self.config.listen_addr()),
            self.config.max_clients,
            self.config.framing
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Server shutting down...");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.admit(stream, peer).await,
                    Err(e) => error!("Error accepting connection: {}", e),
                },
                Some(joined) = self.sessions.join_next(), if !self.sessions.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!("Session task panicked: {}", e);
                        }
                    }
                }
            }
        }

        self.shutdown().await
    }

    /// Reject at capacity, otherwise spawn a session
    async fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        let id = ConnectionId::new();
        let (reader, writer) = stream.into_split();
        let connection = Connection::new(id, self.config.framing, writer);

        if self.registry.active_count() >= self.config.max_clients {
            warn!("Connection rejected from {} - Server full", peer);
            let _ = connection
                .send(&ServerMessage::from(&ChatError::CapacityExceeded))
                .await;
            connection.close().await;
            return;
        }

        info!("New connection from {}", peer);
        let session = Session::new(
            reader,
            Arc::clone(&self.registry),
            SessionOptions::from(&self.config),
        )
        .with_peer(peer);
        let span = info_span!("session", conn = %id, peer = %peer);
        self.sessions.spawn(
            async move {
                if let Err(e) = session.run(connection).await {
                    error!("Connection handler error: {}", e);
                }
            }
            .instrument(span),
        );
    }

    /// Notify and force-close every client, then report statistics
    ///
    /// Session tasks are aborted before anything is written, so no in-flight
    /// delivery still holds a writer. Each notice is bounded by
    /// `NOTICE_TIMEOUT`; a client that stopped reading is closed without it.
    async fn shutdown(mut self) -> ServerStats {
        info!("Closing all client connections...");

        // Drained first so aborted sessions do not announce departures
        let clients = self.registry.drain();
        self.sessions.abort_all();
        while self.sessions.join_next().await.is_some() {}
        drop(self.listener);

        join_all(clients.iter().map(|(handle, client)| async move {
            let notice = client.send(&ServerMessage::ShuttingDown);
            if tokio::time::timeout(NOTICE_TIMEOUT, notice).await.is_err() {
                warn!("Shutdown notice to {} timed out", handle);
            }
            client.close().await;
        }))
        .await;

        let stats = self.registry.stats();
        info!("Total connections handled: {}", stats.total_connections);
        info!("Max concurrent connections: {}", stats.peak_concurrent);
        info!("Server stopped");
        stats
    }
}
