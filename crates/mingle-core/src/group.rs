//! Conversation group membership.
//!
//! Connections and conversations relate many-to-many: a connection may sit
//! in several conversations, and a conversation fans out to every member
//! connection. Membership is transport-level, so two devices of one user
//! each join on their own.

use dashmap::{DashMap, DashSet};
use mingle_protocol::types::{ConnectionId, ConversationId};
use thiserror::Error;
use tracing::debug;

/// Default cap on conversations per connection.
const DEFAULT_MAX_CONVERSATIONS: usize = 100;

/// Group membership errors.
#[derive(Debug, Error)]
pub enum GroupError {
    /// Maximum conversations per connection reached.
    #[error("Maximum conversations reached")]
    MaxConversationsReached,
}

/// Many-to-many membership of connections in conversations.
#[derive(Debug)]
pub struct GroupManager {
    /// Members indexed by conversation.
    members: DashMap<ConversationId, DashSet<ConnectionId>>,
    /// Conversations indexed by connection.
    memberships: DashMap<ConnectionId, DashSet<ConversationId>>,
    /// Cap on conversations per connection.
    max_conversations_per_connection: usize,
}

impl GroupManager {
    /// Create a manager with the default per-connection cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_MAX_CONVERSATIONS)
    }

    /// Create a manager with a specific per-connection cap.
    #[must_use]
    pub fn with_limit(max_conversations_per_connection: usize) -> Self {
        Self {
            members: DashMap::new(),
            memberships: DashMap::new(),
            max_conversations_per_connection,
        }
    }

    /// Add a connection to a conversation group.
    ///
    /// Idempotent for a connection already in the group.
    ///
    /// # Errors
    ///
    /// Returns an error when the connection is at its conversation cap.
    pub fn join(
        &self,
        connection_id: &str,
        conversation_id: ConversationId,
    ) -> Result<(), GroupError> {
        let memberships = self
            .memberships
            .entry(connection_id.to_string())
            .or_default();

        if !memberships.contains(&conversation_id)
            && memberships.len() >= self.max_conversations_per_connection
        {
            return Err(GroupError::MaxConversationsReached);
        }

        memberships.insert(conversation_id);
        drop(memberships);

        self.members
            .entry(conversation_id)
            .or_default()
            .insert(connection_id.to_string());

        debug!(connection = %connection_id, conversation = conversation_id, "Joined group");
        Ok(())
    }

    /// Remove a connection from a conversation group.
    ///
    /// Returns `true` if the connection was a member.
    pub fn leave(&self, connection_id: &str, conversation_id: ConversationId) -> bool {
        let removed = self
            .members
            .get(&conversation_id)
            .map(|members| members.remove(connection_id).is_some())
            .unwrap_or(false);

        if let Some(memberships) = self.memberships.get(connection_id) {
            memberships.remove(&conversation_id);
        }

        if removed {
            debug!(connection = %connection_id, conversation = conversation_id, "Left group");
            self.drop_if_empty(conversation_id);
        }
        removed
    }

    /// Remove a connection from every conversation it is in.
    ///
    /// Returns the conversations it was a member of. Safe to call
    /// concurrently with in-flight fanout for the same connection.
    pub fn leave_all(&self, connection_id: &str) -> Vec<ConversationId> {
        let Some((_, conversations)) = self.memberships.remove(connection_id) else {
            return Vec::new();
        };

        let left: Vec<ConversationId> = conversations.iter().map(|c| *c).collect();
        for conversation_id in &left {
            if let Some(members) = self.members.get(conversation_id) {
                members.remove(connection_id);
            }
            self.drop_if_empty(*conversation_id);
        }

        debug!(connection = %connection_id, groups = left.len(), "Left all groups");
        left
    }

    /// Member connections of a conversation.
    #[must_use]
    pub fn members(&self, conversation_id: ConversationId) -> Vec<ConnectionId> {
        self.members
            .get(&conversation_id)
            .map(|members| members.iter().map(|m| m.clone()).collect())
            .unwrap_or_default()
    }

    /// Conversations a connection belongs to.
    #[must_use]
    pub fn conversations(&self, connection_id: &str) -> Vec<ConversationId> {
        self.memberships
            .get(connection_id)
            .map(|conversations| conversations.iter().map(|c| *c).collect())
            .unwrap_or_default()
    }

    /// Number of conversation groups with at least one member.
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.members.len()
    }

    /// Number of member connections in a conversation.
    #[must_use]
    pub fn member_count(&self, conversation_id: ConversationId) -> usize {
        self.members
            .get(&conversation_id)
            .map(|members| members.len())
            .unwrap_or(0)
    }

    fn drop_if_empty(&self, conversation_id: ConversationId) {
        let empty = self
            .members
            .get(&conversation_id)
            .map(|members| members.is_empty())
            .unwrap_or(false);
        if empty {
            self.members.remove(&conversation_id);
        }
    }
}

impl Default for GroupManager {
    fn default() -> Self {
        Self::new()
    }
}
