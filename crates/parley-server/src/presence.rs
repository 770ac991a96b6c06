//! Online-presence tracking.
//!
//! Maintains the process-wide set of users currently considered online.
//! There is deliberately no reference counting: one leave removes the user
//! outright even when they hold other live connections.  This at-most-one-
//! session presence model is externally observable client behavior and is
//! kept as a policy choice.  Presence is never persisted; the set starts
//! empty on every process start.

use std::collections::HashSet;

use tokio::sync::RwLock;

use parley_shared::types::UserId;

/// The set of users currently "in" a conversation view.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    online: RwLock<HashSet<UserId>>,
}

impl PresenceTracker {
    /// Create a new, empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a user online.
    pub async fn mark_online(&self, user_id: UserId) {
        self.online.write().await.insert(user_id);
    }

    /// Mark a user offline, regardless of how many connections they hold.
    pub async fn mark_offline(&self, user_id: UserId) {
        self.online.write().await.remove(&user_id);
    }

    /// Snapshot of every online user, sorted for deterministic payloads.
    pub async fn snapshot(&self) -> Vec<UserId> {
        let online = self.online.read().await;
        let mut users: Vec<UserId> = online.iter().copied().collect();
        users.sort();
        users
    }

    /// Whether a user is currently marked online.
    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.online.read().await.contains(&user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_online_then_offline_excluded() {
        let tracker = PresenceTracker::new();
        let user = UserId::new();

        tracker.mark_online(user).await;
        assert!(tracker.is_online(user).await);

        tracker.mark_offline(user).await;
        assert!(!tracker.snapshot().await.contains(&user));
    }

    #[tokio::test]
    async fn test_single_leave_removes_fully() {
        // No reference counting: marking online twice (two devices) and
        // offline once leaves the user fully absent.
        let tracker = PresenceTracker::new();
        let user = UserId::new();

        tracker.mark_online(user).await;
        tracker.mark_online(user).await;
        tracker.mark_offline(user).await;

        assert!(tracker.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_reflects_latest_calls() {
        let tracker = PresenceTracker::new();
        let a = UserId::new();
        let b = UserId::new();

        tracker.mark_online(a).await;
        tracker.mark_online(b).await;
        tracker.mark_offline(a).await;

        let snapshot = tracker.snapshot().await;
        assert_eq!(snapshot, vec![b].into_iter().collect::<Vec<_>>());
    }
}
