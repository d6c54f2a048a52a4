//! Registry of online clients
//!
//! The single source of truth for who is online. One mutex guards the
//! handle map and the connection counters; it is held only for map
//! mutation and lookups and never across a socket write.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::client::Client;
use crate::error::ChatError;
use crate::types::{ConnectionId, Handle};

/// Aggregate connection counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Successful registrations since startup
    pub total_connections: u64,
    /// Currently registered clients
    pub active: usize,
    /// Highest `active` ever observed
    pub peak_concurrent: usize,
}

#[derive(Default)]
struct Inner {
    clients: HashMap<Handle, Arc<Client>>,
    total_connections: u64,
    peak_concurrent: usize,
}

/// Thread-safe handle → client map
#[derive(Default)]
pub struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    /// An empty registry with zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Critical sections never panic midway, so a poisoned map is still consistent
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `client` under its handle if the handle is free
    ///
    /// Returns false, with no side effect, when the handle is taken.
    pub fn register(&self, client: Arc<Client>) -> bool {
        let mut inner = self.lock();
        if inner.clients.contains_key(&client.handle) {
            return false;
        }

        let handle = client.handle.clone();
        inner.clients.insert(handle.clone(), client);
        inner.total_connections += 1;
        inner.peak_concurrent = inner.peak_concurrent.max(inner.clients.len());

        info!("{} connected (active: {})", handle, inner.clients.len());
        true
    }

    /// Remove whatever client holds `handle`. Idempotent.
    pub fn unregister(&self, handle: &Handle) -> Option<Arc<Client>> {
        let mut inner = self.lock();
        let removed = inner.clients.remove(handle);
        if removed.is_some() {
            info!("{} disconnected (active: {})", handle, inner.clients.len());
        }
        removed
    }

    /// Remove `handle` only if it still belongs to connection `id`
    ///
    /// A session torn down late must not evict a newer session that has
    /// since registered the same handle.
    pub fn unregister_session(&self, handle: &Handle, id: ConnectionId) -> Option<Arc<Client>> {
        let mut inner = self.lock();
        Self::remove_if_owned(&mut inner, handle, id)
    }

    /// Remove several `(handle, connection)` pairs in one critical section
    pub fn retire(&self, dead: &[(Handle, ConnectionId)]) -> Vec<Arc<Client>> {
        let mut inner = self.lock();
        dead.iter()
            .filter_map(|(handle, id)| Self::remove_if_owned(&mut inner, handle, *id))
            .collect()
    }

    fn remove_if_owned(inner: &mut Inner, handle: &Handle, id: ConnectionId) -> Option<Arc<Client>> {
        if inner.clients.get(handle).map(|c| c.id()) != Some(id) {
            return None;
        }
        let removed = inner.clients.remove(handle);
        info!("{} disconnected (active: {})", handle, inner.clients.len());
        removed
    }

    /// Look up the client currently holding `handle`
    pub fn get(&self, handle: &Handle) -> Option<Arc<Client>> {
        self.lock().clients.get(handle).cloned()
    }

    /// Point-in-time copy for iteration outside the lock, in registration order
    pub fn snapshot(&self) -> Vec<(Handle, Arc<Client>)> {
        let mut entries: Vec<(Handle, Arc<Client>)> = self
            .lock()
            .clients
            .iter()
            .map(|(handle, client)| (handle.clone(), Arc::clone(client)))
            .collect();
        entries.sort_by(|a, b| a.1.connected_at.cmp(&b.1.connected_at).then_with(|| a.0.cmp(&b.0)));
        entries
    }

    /// Handles in registration order
    pub fn list_handles(&self) -> Vec<Handle> {
        self.snapshot().into_iter().map(|(handle, _)| handle).collect()
    }

    /// Number of registered clients
    pub fn active_count(&self) -> usize {
        self.lock().clients.len()
    }

    /// Snapshot of the connection counters
    pub fn stats(&self) -> ServerStats {
        let inner = self.lock();
        ServerStats {
            total_connections: inner.total_connections,
            active: inner.clients.len(),
            peak_concurrent: inner.peak_concurrent,
        }
    }

    /// Remove every client at once (server shutdown)
    pub fn drain(&self) -> Vec<(Handle, Arc<Client>)> {
        let drained: Vec<(Handle, Arc<Client>)> = self.lock().clients.drain().collect();
        debug!("registry drained ({} clients)", drained.len());
        drained
    }
}

/// Scoped ownership of a registry entry
///
/// Dropping the guard releases the entry, so a session that unwinds or is
/// aborted never leaves its handle behind.
pub struct Registration {
    registry: Arc<Registry>,
    client: Arc<Client>,
    released: bool,
}

impl Registration {
    /// Register `client`, failing with `DuplicateHandle` if its handle is taken
    pub fn acquire(registry: Arc<Registry>, client: Arc<Client>) -> Result<Self, ChatError> {
        if !registry.register(Arc::clone(&client)) {
            return Err(ChatError::DuplicateHandle(client.handle.clone()));
        }
        Ok(Self {
            registry,
            client,
            released: false,
        })
    }

    /// The registered client
    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    /// Release the entry now
    ///
    /// Returns false when someone else (broadcast cleanup, shutdown) already
    /// removed it.
    pub fn release(mut self) -> bool {
        self.released = true;
        self.registry
            .unregister_session(&self.client.handle, self.client.id())
            .is_some()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self
            .registry
            .unregister_session(&self.client.handle, self.client.id())
            .is_some()
        {
            debug!("{} released by scope exit", self.client.handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::client;

    #[tokio::test]
    async fn test_register_and_duplicate() {
        let registry = Registry::new();
        let (alice, _a) = client("alice");
        let (impostor, _i) = client("alice");

        assert!(registry.register(Arc::clone(&alice)));
        assert!(!registry.register(impostor));

        // Existing entry untouched
        let current = registry.get(&alice.handle).unwrap();
        assert_eq!(current.id(), alice.id());
        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.stats().total_connections, 1);
    }

    #[tokio::test]
    async fn test_unregister_idempotent() {
        let registry = Registry::new();
        let (alice, _a) = client("alice");
        registry.register(Arc::clone(&alice));

        assert!(registry.unregister(&alice.handle).is_some());
        assert!(registry.unregister(&alice.handle).is_none());
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_stale_session_cannot_evict_new_owner() {
        let registry = Registry::new();
        let (old, _o) = client("alice");
        let (new, _n) = client("alice");

        registry.register(Arc::clone(&old));
        registry.unregister(&old.handle);
        registry.register(Arc::clone(&new));

        assert!(registry.unregister_session(&old.handle, old.id()).is_none());
        assert_eq!(registry.get(&new.handle).unwrap().id(), new.id());
    }

    #[tokio::test]
    async fn test_counters_track_snapshot() {
        let registry = Registry::new();
        let mut peers = Vec::new();
        let mut clients = Vec::new();
        for name in ["a", "b", "c"] {
            let (c, peer) = client(name);
            assert!(registry.register(Arc::clone(&c)));
            clients.push(c);
            peers.push(peer);
        }
        registry.unregister(&clients[1].handle);
        let (d, _d) = client("d");
        registry.register(d);

        let stats = registry.stats();
        let snapshot = registry.snapshot();
        assert_eq!(stats.active, snapshot.len());
        assert_eq!(stats.active, 3);
        assert_eq!(stats.total_connections, 4);
        assert_eq!(stats.peak_concurrent, 3);

        let handles = registry.list_handles();
        let unique: std::collections::HashSet<&Handle> = handles.iter().collect();
        assert_eq!(unique.len(), handles.len());
        assert!(!handles.iter().any(|h| h.as_str() == "b"));
    }

    #[tokio::test]
    async fn test_retire_batch() {
        let registry = Registry::new();
        let (a, _a) = client("a");
        let (b, _b) = client("b");
        registry.register(Arc::clone(&a));
        registry.register(Arc::clone(&b));

        let removed = registry.retire(&[
            (a.handle.clone(), a.id()),
            (b.handle.clone(), ConnectionId::new()),
        ]);
        assert_eq!(removed.len(), 1);
        assert_eq!(registry.list_handles(), vec![b.handle.clone()]);
    }

    #[tokio::test]
    async fn test_registration_guard() {
        let registry = Arc::new(Registry::new());
        let (a, _a) = client("a");

        let guard = Registration::acquire(Arc::clone(&registry), Arc::clone(&a)).unwrap();
        assert!(matches!(
            Registration::acquire(Arc::clone(&registry), Arc::clone(&a)),
            Err(ChatError::DuplicateHandle(_))
        ));
        drop(guard);
        assert_eq!(registry.active_count(), 0);

        let guard = Registration::acquire(Arc::clone(&registry), Arc::clone(&a)).unwrap();
        registry.unregister(&a.handle);
        assert!(!guard.release());
    }

    #[tokio::test]
    async fn test_drain() {
        let registry = Registry::new();
        let (a, _a) = client("a");
        let (b, _b) = client("b");
        registry.register(a);
        registry.register(b);

        assert_eq!(registry.drain().len(), 2);
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.stats().peak_concurrent, 2);
    }
}
