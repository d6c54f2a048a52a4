//! Shared helpers for unit tests

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, DuplexStream};

use crate::client::Client;
use crate::codec::Framing;
use crate::connection::Connection;
use crate::types::{ConnectionId, Handle};

const PIPE_CAPACITY: usize = 64 * 1024;

/// A line-framed client whose output can be read from the returned stream
pub(crate) fn client(name: &str) -> (Arc<Client>, DuplexStream) {
    let (peer, local) = tokio::io::duplex(PIPE_CAPACITY);
    let connection = Connection::new(ConnectionId::new(), Framing::Line, local);
    let client = Client::new(Handle::parse(name).unwrap(), connection);
    (Arc::new(client), peer)
}

/// Read until `needle` shows up, panicking after two seconds
pub(crate) async fn read_until<S>(stream: &mut S, needle: &str) -> String
where
    S: AsyncRead + Unpin,
{
    let mut seen = String::new();
    let mut buf = [0u8; 8192];
    let found = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                return false;
            }
            seen.push_str(&String::from_utf8_lossy(&buf[..n]));
            if seen.contains(needle) {
                return true;
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(found, "never received {:?}, got {:?}", needle, seen);
    seen
}

/// Everything that arrives within a short quiet window
pub(crate) async fn read_pending<S>(stream: &mut S) -> String
where
    S: AsyncRead + Unpin,
{
    let mut seen = String::new();
    let mut buf = [0u8; 8192];
    while let Ok(Ok(n)) =
        tokio::time::timeout(Duration::from_millis(100), stream.read(&mut buf)).await
    {
        if n == 0 {
            break;
        }
        seen.push_str(&String::from_utf8_lossy(&buf[..n]));
    }
    seen
}
