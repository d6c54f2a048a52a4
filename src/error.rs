//! Error types for the chat relay
//!
//! Defines the application-level error taxonomy and socket write errors.
//! Uses thiserror for ergonomic error definitions.

use std::io;

use thiserror::Error;

use crate::types::Handle;

/// Application-level errors
///
/// Covers handshake errors (terminal for the connection), routing errors
/// (reported back to the sender as text), connection-level outcomes that
/// drive a session to close, and startup errors.
#[derive(Debug, Error)]
pub enum ChatError {
    /// IO error on the listener or a socket
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Configuration file could not be parsed
    #[error("Config file error: {0}")]
    ConfigFile(#[from] toml::de::Error),

    /// Configuration values are out of range
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Handle is already registered by another session
    #[error("Username already taken: {0}")]
    DuplicateHandle(Handle),

    /// Handshake produced an empty handle
    #[error("Username is empty")]
    EmptyHandle,

    /// Direct message target is not registered
    #[error("User '{0}' is not online")]
    TargetOffline(Handle),

    /// Write to a specific recipient failed
    #[error("Could not deliver message to {target}")]
    DeliveryFailure {
        target: Handle,
        #[source]
        source: SendError,
    },

    /// Malformed `/private` command
    #[error("Invalid command usage")]
    InvalidUsage,

    /// Orderly disconnect (zero-byte read)
    #[error("Peer closed the connection")]
    PeerClosed,

    /// Abnormal disconnect
    #[error("Connection reset by peer")]
    PeerReset,

    /// Idle timeout whose liveness probe failed
    #[error("Idle timeout")]
    IdleTimeout,

    /// Server already holds `max_clients` sessions
    #[error("Server is full")]
    CapacityExceeded,
}

impl ChatError {
    /// Classify a failed socket read
    pub fn from_read(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => ChatError::PeerReset,
            _ => ChatError::Io(err),
        }
    }

    /// True for outcomes that are a normal end of a connection
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            ChatError::PeerClosed | ChatError::PeerReset | ChatError::IdleTimeout
        )
    }
}

/// Message send errors
///
/// Occurs when writing to a connection that is closed or failing.
#[derive(Debug, Error)]
pub enum SendError {
    /// The connection has already been closed locally
    #[error("Connection closed")]
    Closed,

    /// The socket write failed
    #[error("Write failed: {0}")]
    Io(#[from] io::Error),
}
