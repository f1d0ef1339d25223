//! Live connection tracking.
//!
//! The dispatcher owns one [`ConnectionRegistry`]. Connections are indexed by
//! [`ConnectionId`] and removed when their task ends, so account-wide actions
//! (log out everywhere, shutdown) only reach connections that are still live.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use sealpost_net::{ConnectionHandle, ConnectionId};

#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // The map stays consistent even if a holder panicked, so poisoning is ignored.
    fn map(&self) -> MutexGuard<'_, HashMap<ConnectionId, ConnectionHandle>> {
        self.connections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn on_connected(&self, handle: ConnectionHandle) {
        let mut map = self.map();
        debug!(conn = %handle.id(), peer = %handle.peer_addr(), "Tracking connection");
        map.insert(handle.id(), handle);
    }

    pub fn on_disconnected(&self, id: ConnectionId) {
        let mut map = self.map();
        if map.remove(&id).is_some() {
            debug!(conn = %id, active = map.len(), "Connection removed");
        }
    }

    pub fn len(&self) -> usize {
        self.map().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget `username` on every connection authenticated as it.
    /// Returns how many connections were affected.
    pub fn log_out_everywhere(&self, username: &str) -> usize {
        let map = self.map();
        let mut count = 0;
        for handle in map.values() {
            if handle.username().as_deref() == Some(username) {
                handle.set_username(None);
                count += 1;
            }
        }
        count
    }

    pub fn close_all(&self) {
        let handles: Vec<ConnectionHandle> = self.map().values().cloned().collect();
        for handle in handles {
            handle.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn connection() -> (ConnectionHandle, ConnectionHandle) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (client, _) = sealpost_net::connect(&addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let (server, _) = sealpost_net::spawn(stream).unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn test_track_and_remove() {
        let registry = ConnectionRegistry::new();
        let (server, _client) = connection().await;
        let id = server.id();

        registry.on_connected(server);
        assert_eq!(registry.len(), 1);

        registry.on_disconnected(id);
        registry.on_disconnected(id);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_log_out_everywhere() {
        let registry = ConnectionRegistry::new();
        let (a, _ca) = connection().await;
        let (b, _cb) = connection().await;
        let (c, _cc) = connection().await;
        a.set_username(Some("alice".into()));
        b.set_username(Some("alice".into()));
        c.set_username(Some("bob".into()));
        registry.on_connected(a.clone());
        registry.on_connected(b.clone());
        registry.on_connected(c.clone());

        assert_eq!(registry.log_out_everywhere("alice"), 2);
        assert_eq!(a.username(), None);
        assert_eq!(b.username(), None);
        assert_eq!(c.username().as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_close_all() {
        let registry = ConnectionRegistry::new();
        let (a, _ca) = connection().await;
        registry.on_connected(a.clone());

        registry.close_all();
        assert!(a.is_closed());
    }
}
