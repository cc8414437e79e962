//! Presence tracking for the hub.
//!
//! The registry maps live connections to authenticated users. One user may
//! hold several connections at once (multi-device); a user is "present"
//! while at least one of their connections is open.

use dashmap::DashMap;
use mingle_protocol::types::{ConnectionId, UserId};
use tracing::debug;

/// Process-wide presence registry.
///
/// Backed by a sharded map so join/leave/snapshot traffic from concurrent
/// connection tasks never serializes on a single registry lock. Constructed
/// explicitly at process start and shared by `Arc`.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    entries: DashMap<ConnectionId, UserId>,
}

impl PresenceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a user.
    ///
    /// Idempotent: re-registering the same connection updates the mapping.
    /// Returns `true` if this connection was not previously registered.
    pub fn join(&self, connection_id: impl Into<ConnectionId>, user_id: impl Into<UserId>) -> bool {
        let conn_id = connection_id.into();
        let is_new = self.entries.insert(conn_id.clone(), user_id.into()).is_none();

        if is_new {
            debug!(connection = %conn_id, "Presence: connection registered");
        }
        is_new
    }

    /// Remove a connection's mapping, if present.
    ///
    /// Returns the user the connection belonged to.
    pub fn leave(&self, connection_id: &str) -> Option<UserId> {
        let removed = self.entries.remove(connection_id).map(|(_, user)| user);
        if removed.is_some() {
            debug!(connection = %connection_id, "Presence: connection removed");
        }
        removed
    }

    /// Resolve the user behind a connection.
    #[must_use]
    pub fn user_of(&self, connection_id: &str) -> Option<UserId> {
        self.entries.get(connection_id).map(|u| u.clone())
    }

    /// Resolve any live connection for a user.
    #[must_use]
    pub fn connection_of(&self, user_id: &str) -> Option<ConnectionId> {
        self.entries
            .iter()
            .find(|entry| entry.value() == user_id)
            .map(|entry| entry.key().clone())
    }

    /// All connections currently held by a user.
    #[must_use]
    pub fn connections_of(&self, user_id: &str) -> Vec<ConnectionId> {
        self.entries
            .iter()
            .filter(|entry| entry.value() == user_id)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Distinct user ids with at least one open connection.
    #[must_use]
    pub fn active_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.entries.iter().map(|e| e.value().clone()).collect();
        users.sort();
        users.dedup();
        users
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.entries.len()
    }

    /// Check whether a user holds any open connection.
    #[must_use]
    pub fn is_present(&self, user_id: &str) -> bool {
        self.entries.iter().any(|entry| entry.value() == user_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_leave() {
        let presence = PresenceRegistry::new();

        assert!(presence.join("conn-1", "alice"));
        assert!(!presence.join("conn-1", "alice")); // Already registered

        assert_eq!(presence.user_of("conn-1").as_deref(), Some("alice"));
        assert_eq!(presence.leave("conn-1").as_deref(), Some("alice"));
        assert!(presence.leave("conn-1").is_none());
        assert!(presence.user_of("conn-1").is_none());
    }

    #[test]
    fn test_active_set_matches_open_connections() {
        let presence = PresenceRegistry::new();

        // alice on two devices, bob on one
        presence.join("conn-1", "alice");
        presence.join("conn-2", "alice");
        presence.join("conn-3", "bob");

        assert_eq!(presence.active_users(), vec!["alice", "bob"]);
        assert_eq!(presence.connection_count(), 3);

        // Dropping one of alice's devices keeps her present
        presence.leave("conn-1");
        assert!(presence.is_present("alice"));
        assert_eq!(presence.active_users(), vec!["alice", "bob"]);

        // Dropping the last one removes her
        presence.leave("conn-2");
        assert!(!presence.is_present("alice"));
        assert_eq!(presence.active_users(), vec!["bob"]);
    }

    #[test]
    fn test_connection_resolution() {
        let presence = PresenceRegistry::new();
        presence.join("conn-1", "alice");
        presence.join("conn-2", "alice");

        let resolved = presence.connection_of("alice").unwrap();
        assert!(resolved == "conn-1" || resolved == "conn-2");

        let mut all = presence.connections_of("alice");
        all.sort();
        assert_eq!(all, vec!["conn-1", "conn-2"]);

        assert!(presence.connection_of("bob").is_none());
    }
}
