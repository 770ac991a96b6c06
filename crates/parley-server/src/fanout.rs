//! Event fan-out.
//!
//! Resolves a set of target users to their live connection handles and
//! pushes one event to each.  Delivery is best-effort and fire-and-forget:
//! a target with no live connection silently receives nothing, and a dead
//! handle never aborts delivery to the remaining targets.  Per handle,
//! events arrive in the order `dispatch` was called; there is no ordering
//! guarantee across connections, no acknowledgement, and no retry.

use std::sync::Arc;

use tracing::{debug, trace};

use parley_shared::events::ServerEvent;
use parley_shared::types::UserId;

use crate::registry::ConnectionRegistry;

/// Pushes events to the live connections of target users.
#[derive(Clone)]
pub struct FanoutRouter {
    registry: Arc<ConnectionRegistry>,
}

impl FanoutRouter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Push `event` to every live connection of every target user.
    pub async fn dispatch(&self, targets: &[UserId], event: ServerEvent) {
        let handles = self.registry.resolve_many(targets).await;
        if handles.is_empty() {
            trace!(targets = targets.len(), "dispatch found no live handles");
            return;
        }

        let mut dropped = 0usize;
        for handle in &handles {
            // A send error means the connection's writer task is gone; the
            // teardown path will unregister it shortly.
            if handle.send(event.clone()).is_err() {
                dropped += 1;
            }
        }

        if dropped > 0 {
            debug!(
                delivered = handles.len() - dropped,
                dropped, "dispatch hit closed connection handles"
            );
        }
    }

    /// Push `event` to a single user's live connections.
    pub async fn dispatch_to(&self, target: UserId, event: ServerEvent) {
        self.dispatch(std::slice::from_ref(&target), event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    use crate::registry::ConnectionId;

    fn router() -> (FanoutRouter, Arc<ConnectionRegistry>) {
        let registry = Arc::new(ConnectionRegistry::new());
        (FanoutRouter::new(registry.clone()), registry)
    }

    #[tokio::test]
    async fn test_dispatch_to_offline_user_is_noop() {
        let (router, _) = router();
        // Must not error or panic.
        router
            .dispatch(&[UserId::new(), UserId::new()], ServerEvent::RefetchChats)
            .await;
    }

    #[tokio::test]
    async fn test_dispatch_reaches_every_target_handle() {
        let (router, registry) = router();
        let alice = UserId::new();
        let bob = UserId::new();

        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        registry.register(alice, ConnectionId::new(), alice_tx).await;
        registry.register(bob, ConnectionId::new(), bob_tx).await;

        router.dispatch(&[alice, bob], ServerEvent::NewRequest).await;

        assert_eq!(alice_rx.recv().await, Some(ServerEvent::NewRequest));
        assert_eq!(bob_rx.recv().await, Some(ServerEvent::NewRequest));
    }

    #[tokio::test]
    async fn test_closed_handle_does_not_abort_remaining() {
        let (router, registry) = router();
        let alice = UserId::new();
        let bob = UserId::new();

        let (alice_tx, alice_rx) = mpsc::unbounded_channel();
        drop(alice_rx); // alice's writer task is gone
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        registry.register(alice, ConnectionId::new(), alice_tx).await;
        registry.register(bob, ConnectionId::new(), bob_tx).await;

        router.dispatch(&[alice, bob], ServerEvent::RefetchChats).await;

        assert_eq!(bob_rx.recv().await, Some(ServerEvent::RefetchChats));
    }

    #[tokio::test]
    async fn test_per_handle_ordering_follows_dispatch_order() {
        let (router, registry) = router();
        let user = UserId::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        registry.register(user, ConnectionId::new(), tx).await;

        router.dispatch_to(user, ServerEvent::NewRequest).await;
        router.dispatch_to(user, ServerEvent::RefetchChats).await;

        assert_eq!(rx.recv().await, Some(ServerEvent::NewRequest));
        assert_eq!(rx.recv().await, Some(ServerEvent::RefetchChats));
    }
}
