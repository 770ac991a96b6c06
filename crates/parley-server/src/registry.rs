//! Live connection tracking.
//!
//! Maps each user identity to the set of connections currently open for
//! them.  A user may hold several connections at once (multi-device); each
//! is tracked and torn down independently.  The raw map is never exposed:
//! callers go through `register` / `unregister` / `resolve`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;
use uuid::Uuid;

use parley_shared::events::ServerEvent;
use parley_shared::types::UserId;

/// Identity of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An addressable live connection: the sending half of the channel feeding
/// that connection's writer task.
pub type ConnectionHandle = mpsc::UnboundedSender<ServerEvent>;

/// State kept per admitted connection.
#[derive(Debug, Clone)]
struct ConnectionRecord {
    handle: ConnectionHandle,
    connected_at: DateTime<Utc>,
}

/// Tracks every live connection, keyed by owning user.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<UserId, HashMap<ConnectionId, ConnectionRecord>>>,
}

impl ConnectionRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly admitted connection.
    pub async fn register(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
        handle: ConnectionHandle,
    ) {
        let mut connections = self.connections.write().await;
        connections.entry(user_id).or_default().insert(
            connection_id,
            ConnectionRecord {
                handle,
                connected_at: Utc::now(),
            },
        );

        debug!(user = %user_id, connection = %connection_id, "registered connection");
    }

    /// Remove one specific connection.  Other connections held by the same
    /// user are untouched.
    ///
    /// Returns `true` if the connection was present -- callers use this to
    /// make their teardown paths idempotent.
    pub async fn unregister(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;

        let Some(records) = connections.get_mut(&user_id) else {
            return false;
        };
        let removed = records.remove(&connection_id).is_some();
        if records.is_empty() {
            connections.remove(&user_id);
        }

        if removed {
            debug!(user = %user_id, connection = %connection_id, "unregistered connection");
        }
        removed
    }

    /// All live handles for a user.  Unknown users resolve to an empty
    /// vector, never an error.
    pub async fn resolve(&self, user_id: UserId) -> Vec<ConnectionHandle> {
        let connections = self.connections.read().await;
        connections
            .get(&user_id)
            .map(|records| records.values().map(|r| r.handle.clone()).collect())
            .unwrap_or_default()
    }

    /// All live handles across a set of target users.
    pub async fn resolve_many(&self, user_ids: &[UserId]) -> Vec<ConnectionHandle> {
        let connections = self.connections.read().await;
        let mut handles = Vec::new();
        for user_id in user_ids {
            if let Some(records) = connections.get(user_id) {
                handles.extend(records.values().map(|r| r.handle.clone()));
            }
        }
        handles
    }

    /// Number of live connections across all users.
    pub async fn connection_count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.values().map(|records| records.len()).sum()
    }

    /// How long a given connection has been open, if it is still live.
    pub async fn connected_since(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Option<DateTime<Utc>> {
        let connections = self.connections.read().await;
        connections
            .get(&user_id)
            .and_then(|records| records.get(&connection_id))
            .map(|record| record.connected_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> (ConnectionHandle, mpsc::UnboundedReceiver<ServerEvent>) {
        mpsc::unbounded_channel()
    }

    #[tokio::test]
    async fn test_resolve_unknown_user_is_empty() {
        let registry = ConnectionRegistry::new();
        assert!(registry.resolve(UserId::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_multi_device_retained() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let (phone_tx, _phone_rx) = handle();
        let (laptop_tx, mut laptop_rx) = handle();
        let phone = ConnectionId::new();
        let laptop = ConnectionId::new();

        registry.register(user, phone, phone_tx).await;
        registry.register(user, laptop, laptop_tx).await;
        assert_eq!(registry.resolve(user).await.len(), 2);

        // Dropping one device leaves the other resolvable.
        assert!(registry.unregister(user, phone).await);
        let remaining = registry.resolve(user).await;
        assert_eq!(remaining.len(), 1);

        remaining[0].send(ServerEvent::RefetchChats).unwrap();
        assert_eq!(laptop_rx.recv().await, Some(ServerEvent::RefetchChats));
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let (tx, _rx) = handle();
        let connection = ConnectionId::new();

        registry.register(user, connection, tx).await;
        assert!(registry.unregister(user, connection).await);
        assert!(!registry.unregister(user, connection).await);
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_resolve_many_collects_all_targets() {
        let registry = ConnectionRegistry::new();
        let alice = UserId::new();
        let bob = UserId::new();
        let offline = UserId::new();
        let (alice_tx, _a) = handle();
        let (bob_tx, _b) = handle();

        registry.register(alice, ConnectionId::new(), alice_tx).await;
        registry.register(bob, ConnectionId::new(), bob_tx).await;

        let handles = registry.resolve_many(&[alice, bob, offline]).await;
        assert_eq!(handles.len(), 2);
    }
}
