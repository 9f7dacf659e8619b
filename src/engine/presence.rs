//! Presence Tracker
//!
//! The set of user ids currently considered online. A user is online iff at
//! least one live connection carries that user id; the dispatcher confirms
//! that against the registry before marking anyone offline.
//!
//! Snapshots are sorted by user id so clients can diff updates and tests
//! are deterministic.

use std::collections::BTreeSet;
use tokio::sync::RwLock;

/// Tracks which user ids are currently online
pub struct PresenceTracker {
    online: RwLock<BTreeSet<String>>,
}

impl PresenceTracker {
    /// Create an empty presence set
    pub fn new() -> Self {
        Self {
            online: RwLock::new(BTreeSet::new()),
        }
    }

    /// Mark a user online. Returns true iff the set changed.
    pub async fn mark_online(&self, user_id: &str) -> bool {
        let changed = self.online.write().await.insert(user_id.to_string());
        if changed {
            tracing::info!(user_id = %user_id, "user online");
        }
        changed
    }

    /// Mark a user offline, but only if the caller has confirmed no other
    /// live connection exists for that user. Returns true iff the set
    /// changed.
    pub async fn mark_offline_if_last(&self, user_id: &str, has_other_connections: bool) -> bool {
        if has_other_connections {
            return false;
        }
        let changed = self.online.write().await.remove(user_id);
        if changed {
            tracing::info!(user_id = %user_id, "user offline");
        }
        changed
    }

    /// Whether a user is currently online
    pub async fn contains(&self, user_id: &str) -> bool {
        self.online.read().await.contains(user_id)
    }

    /// Number of online users
    pub async fn len(&self) -> usize {
        self.online.read().await.len()
    }

    /// Whether no users are online
    pub async fn is_empty(&self) -> bool {
        self.online.read().await.is_empty()
    }

    /// The current online-user set, sorted by user id
    pub async fn snapshot(&self) -> Vec<String> {
        self.online.read().await.iter().cloned().collect()
    }
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}
