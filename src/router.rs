//! Message routing
//!
//! Interprets one line from a registered client and performs the resulting
//! deliveries. The router holds no state of its own; everything goes
//! through the registry.

use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, info, warn};

use crate::client::Client;
use crate::error::ChatError;
use crate::message::{Command, ServerMessage};
use crate::registry::Registry;
use crate::types::{ConnectionId, Handle};

/// Outcome of one broadcast fan-out
#[derive(Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients that were written successfully
    pub delivered: usize,
    /// Recipients whose write failed and who were removed
    pub dropped: Vec<Handle>,
}

#[derive(Clone)]
pub struct Router {
    registry: Arc<Registry>,
}

impl Router {
    /// Router over a shared registry
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Route one line from `sender`
    pub async fn route(&self, sender: &Client, line: &str) {
        match Command::parse(line) {
            Command::Broadcast(text) => {
                let preview: String = text.chars().take(50).collect();
                info!("Group: {}: {}", sender.handle, preview);
                let msg = ServerMessage::Chat {
                    from: sender.handle.clone(),
                    text,
                };
                self.broadcast(&msg, Some(&sender.handle)).await;
            }
            Command::PrivateMessage { target, text } => {
                if let Err(err) = self.send_direct(sender, &target, text).await {
                    self.reply(sender, ServerMessage::from(&err)).await;
                }
            }
            Command::ListUsers => {
                let handles = self.registry.list_handles();
                self.reply(sender, ServerMessage::UserList { handles }).await;
            }
            Command::Help => {
                self.reply(sender, ServerMessage::Help).await;
            }
            Command::InvalidUsage => {
                self.reply(sender, ServerMessage::from(&ChatError::InvalidUsage))
                    .await;
            }
        }
    }

    /// Deliver a private message to `target` and confirm to `sender`
    pub async fn send_direct(
        &self,
        sender: &Client,
        target: &Handle,
        text: String,
    ) -> Result<(), ChatError> {
        let Some(recipient) = self.registry.get(target) else {
            return Err(ChatError::TargetOffline(target.clone()));
        };

        let msg = ServerMessage::Private {
            from: sender.handle.clone(),
            text,
        };
        if let Err(source) = recipient.send(&msg).await {
            warn!("Failed to send private message to {}: {}", target, source);
            return Err(ChatError::DeliveryFailure {
                target: target.clone(),
                source,
            });
        }

        info!("Private: {} -> {}", sender.handle, target);
        self.reply(sender, ServerMessage::Sent { to: target.clone() })
            .await;
        Ok(())
    }

    /// Fan `msg` out to every registered client except `exclude`
    ///
    /// Writes happen outside the registry lock. Recipients whose write fails
    /// are removed afterwards without a leave notice, and nothing is reported
    /// to the original sender.
    pub async fn broadcast(&self, msg: &ServerMessage, exclude: Option<&Handle>) -> BroadcastReport {
        let recipients: Vec<Arc<Client>> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|(handle, _)| Some(handle) != exclude)
            .map(|(_, client)| client)
            .collect();

        let outcomes = join_all(recipients.iter().map(|client| client.send(msg))).await;

        let mut report = BroadcastReport::default();
        let mut dead: Vec<(Handle, ConnectionId)> = Vec::new();
        for (client, outcome) in recipients.iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    warn!("Failed to send to {}: {}", client.handle, err);
                    dead.push((client.handle.clone(), client.id()));
                }
            }
        }

        if !dead.is_empty() {
            for client in self.registry.retire(&dead) {
                client.close().await;
                report.dropped.push(client.handle.clone());
            }
        }

        report
    }

    /// Tell everyone else that `handle` joined
    pub async fn announce_join(&self, handle: &Handle) {
        let msg = ServerMessage::Joined {
            handle: handle.clone(),
        };
        self.broadcast(&msg, Some(handle)).await;
    }

    /// Tell everyone still online that `handle` left
    pub async fn announce_leave(&self, handle: &Handle) {
        let msg = ServerMessage::Left {
            handle: handle.clone(),
        };
        self.broadcast(&msg, Some(handle)).await;
    }

    /// Reply to the sender only
    ///
    /// A failed write is left for the sender's own read loop to notice.
    async fn reply(&self, sender: &Client, msg: ServerMessage) {
        if let Err(err) = sender.send(&msg).await {
            debug!("Reply to {} failed: {}", sender.handle, err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{client, read_pending, read_until};

    fn setup(names: &[&str]) -> (Router, Arc<Registry>, Vec<(Arc<Client>, tokio::io::DuplexStream)>) {
        let registry = Arc::new(Registry::new());
        let clients: Vec<_> = names
            .iter()
            .map(|name| {
                let (c, peer) = client(name);
                assert!(registry.register(Arc::clone(&c)));
                (c, peer)
            })
            .collect();
        (Router::new(Arc::clone(&registry)), registry, clients)
    }

    #[tokio::test]
    async fn test_group_message_skips_sender() {
        let (router, _registry, mut clients) = setup(&["A", "B", "C"]);
        let sender = Arc::clone(&clients[0].0);

        router.route(&sender, "hello").await;

        assert_eq!(read_pending(&mut clients[1].1).await, "A: hello\n");
        assert_eq!(read_pending(&mut clients[2].1).await, "A: hello\n");
        assert_eq!(read_pending(&mut clients[0].1).await, "");
    }

    #[tokio::test]
    async fn test_private_message() {
        let (router, _registry, mut clients) = setup(&["A", "B", "C"]);
        let sender = Arc::clone(&clients[0].0);

        router.route(&sender, "/private B hi").await;

        assert_eq!(read_pending(&mut clients[1].1).await, "[PRIVATE] A: hi\n");
        assert_eq!(
            read_pending(&mut clients[0].1).await,
            "[SENT] Private message to B\n"
        );
        assert_eq!(read_pending(&mut clients[2].1).await, "");
    }

    #[tokio::test]
    async fn test_private_to_offline_handle() {
        let (router, _registry, mut clients) = setup(&["A", "B"]);
        let sender = Arc::clone(&clients[0].0);

        router.route(&sender, "/private ghost hi").await;

        assert_eq!(
            read_pending(&mut clients[0].1).await,
            "[ERROR] User 'ghost' is not online\n"
        );
        assert_eq!(read_pending(&mut clients[1].1).await, "");
    }

    #[tokio::test]
    async fn test_private_delivery_failure_reported() {
        let (router, registry, mut clients) = setup(&["A", "B"]);
        let sender = Arc::clone(&clients[0].0);
        let (_b, b_peer) = clients.remove(1);
        drop(b_peer);

        router.route(&sender, "/private B hi").await;

        assert_eq!(
            read_pending(&mut clients[0].1).await,
            "[ERROR] Could not deliver message to B\n"
        );
        // Direct delivery reports the failure but leaves cleanup to B's session
        assert_eq!(registry.active_count(), 2);
    }

    #[tokio::test]
    async fn test_usage_error() {
        let (router, _registry, mut clients) = setup(&["A"]);
        let sender = Arc::clone(&clients[0].0);

        router.route(&sender, "/private B").await;

        assert_eq!(
            read_pending(&mut clients[0].1).await,
            "[ERROR] Usage: /private <username> <message>\n"
        );
    }

    #[tokio::test]
    async fn test_list_users_and_help() {
        let (router, _registry, mut clients) = setup(&["A", "B"]);
        let sender = Arc::clone(&clients[0].0);

        router.route(&sender, "/users").await;
        let reply = read_until(&mut clients[0].1, "\n").await;
        assert!(reply.starts_with("[SERVER] Online users (2): "));
        assert!(reply.contains('A') && reply.contains('B'));

        router.route(&sender, "/help").await;
        let reply = read_until(&mut clients[0].1, "Type normally for group chat").await;
        assert!(reply.contains("/private <username> <message>"));
        assert_eq!(read_pending(&mut clients[1].1).await, "");
    }

    #[tokio::test]
    async fn test_broadcast_removes_dead_recipients_silently() {
        let (router, registry, mut clients) = setup(&["A", "B", "C"]);
        let (_c, c_peer) = clients.remove(2);
        drop(c_peer);
        let sender = Arc::clone(&clients[0].0);

        let msg = ServerMessage::Chat {
            from: sender.handle.clone(),
            text: "hello".to_string(),
        };
        let report = router.broadcast(&msg, Some(&sender.handle)).await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, vec![Handle::parse("C").unwrap()]);
        assert_eq!(registry.active_count(), 2);

        // No leave notice for C, no failure report to A
        assert_eq!(read_pending(&mut clients[1].1).await, "A: hello\n");
        assert_eq!(read_pending(&mut clients[0].1).await, "");
    }

    #[tokio::test]
    async fn test_join_notice_excludes_newcomer() {
        let (router, _registry, mut clients) = setup(&["A", "B"]);
        let newcomer = clients[1].0.handle.clone();

        router.announce_join(&newcomer).await;

        assert_eq!(
            read_pending(&mut clients[0].1).await,
            "[SERVER] B joined the chat\n"
        );
        assert_eq!(read_pending(&mut clients[1].1).await, "");
    }
}
