//! Multi-client TCP Chat Relay Library
//!
//! A tokio chat server: clients connect over TCP, pick a unique handle,
//! and exchange group and private messages routed through the server.
//!
//! # Features
//! - Handle registration with duplicate rejection
//! - Group chat broadcast to everyone else
//! - Private messages with delivery confirmation
//! - `/users` and `/help` commands
//! - Capacity limit enforced at accept time
//! - Idle timeout with liveness probing
//! - Graceful shutdown with connection statistics
//!
//! # Architecture
//! - `Registry` is the single mutex-guarded map of online clients
//! - `Router` turns one client line into deliveries, outside the lock
//! - `Session` is the per-connection state machine
//!   (`Handshaking → Active → Closing → Closed`)
//! - `ChatServer` accepts connections and spawns one session task each
//!
//! # Example
//! ```ignore
//! use chat_relay::{ChatServer, Config};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), chat_relay::ChatError> {
//!     let server = ChatServer::bind(Config::default()).await?;
//!     let stats = server
//!         .run(async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await;
//!     println!("peak concurrent: {}", stats.peak_concurrent);
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod registry;
pub mod router;
pub mod server;
pub mod session;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export main types for convenience
pub use client::Client;
pub use codec::{FrameDecoder, Framing};
pub use config::Config;
pub use connection::Connection;
pub use error::{ChatError, SendError};
pub use message::{Command, ServerMessage};
pub use registry::{Registration, Registry, ServerStats};
pub use router::{BroadcastReport, Router};
pub use server::ChatServer;
pub use session::{Session, SessionOptions, SessionState};
pub use types::{ConnectionId, Handle};
