use std::collections::HashSet;

use tokio::sync::RwLock;

/// Tracks, per signed-in user, whether the one-time post-sign-in download has
/// already run during this service session.
///
/// Deliberately process-memory rather than SQLite: the flag must survive UI
/// disconnect/reconnect (the service keeps running) and must reset when the
/// service restarts. Persisting it would let a stale remote snapshot wipe
/// marks created while the UI was closed, on the next sign-in after a
/// restart.
pub struct SessionGuard {
    synced_users: RwLock<HashSet<String>>,
}

impl SessionGuard {
    pub fn new() -> Self {
        Self {
            synced_users: RwLock::new(HashSet::new()),
        }
    }

    pub async fn has_synced_this_session(&self, user_id: &str) -> bool {
        self.synced_users.read().await.contains(user_id)
    }

    pub async fn mark_synced(&self, user_id: &str) {
        self.synced_users.write().await.insert(user_id.to_string());
    }
}

impl Default for SessionGuard {
    fn default() -> Self {
        Self::new()
    }
}
