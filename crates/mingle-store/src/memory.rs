//! In-process reference implementations of the collaborator seams.
//!
//! These back the default server wiring and the core test suites. State
//! lives in sharded concurrent maps, so no method holds a lock across an
//! await point.

use crate::traits::{Authenticator, ConversationStore, ProfileDirectory, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use mingle_protocol::types::{
    ChatMessage, Conversation, ConversationId, MessageState, UserId, UserProfile,
};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::debug;

/// In-memory profile directory.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    profiles: DashMap<UserId, UserProfile>,
}

impl MemoryDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a profile.
    pub fn insert(&self, profile: UserProfile) {
        self.profiles.insert(profile.user_id.clone(), profile);
    }
}

#[async_trait]
impl ProfileDirectory for MemoryDirectory {
    async fn profile(&self, user_id: &UserId) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.profiles.get(user_id).map(|p| p.clone()))
    }
}

/// In-memory conversation and message store.
///
/// Conversation ids are allocated from a monotonic sequence, mirroring a
/// database identity column.
#[derive(Debug, Default)]
pub struct MemoryStore {
    next_id: AtomicI64,
    conversations: DashMap<ConversationId, Conversation>,
    messages: DashMap<ConversationId, Vec<ChatMessage>>,
    guid_index: DashMap<String, ConversationId>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages stored for a conversation.
    #[must_use]
    pub fn message_count(&self, id: ConversationId) -> usize {
        self.messages.get(&id).map(|m| m.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn create_conversation(&self, members: &[UserId]) -> Result<ConversationId, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.conversations
            .insert(id, Conversation::new(id, members.to_vec()));
        self.messages.insert(id, Vec::new());
        debug!(conversation = id, members = members.len(), "Conversation created");
        Ok(id)
    }

    async fn conversation(&self, id: ConversationId) -> Result<Option<Conversation>, StoreError> {
        Ok(self.conversations.get(&id).map(|c| c.clone()))
    }

    async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError> {
        let mut entry = self
            .messages
            .get_mut(&message.conversation_id)
            .ok_or(StoreError::ConversationNotFound(message.conversation_id))?;

        entry.push(message.clone());
        self.guid_index
            .insert(message.guid.clone(), message.conversation_id);
        Ok(())
    }

    async fn message_by_guid(&self, guid: &str) -> Result<Option<ChatMessage>, StoreError> {
        let Some(conversation_id) = self.guid_index.get(guid).map(|c| *c) else {
            return Ok(None);
        };

        Ok(self.messages.get(&conversation_id).and_then(|messages| {
            messages.iter().find(|m| m.guid == guid).cloned()
        }))
    }

    async fn update_message_state(
        &self,
        guid: &str,
        state: MessageState,
    ) -> Result<bool, StoreError> {
        let Some(conversation_id) = self.guid_index.get(guid).map(|c| *c) else {
            return Ok(false);
        };

        let Some(mut messages) = self.messages.get_mut(&conversation_id) else {
            return Ok(false);
        };

        match messages.iter_mut().find(|m| m.guid == guid) {
            Some(message) => {
                message.state = state;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn refresh_summary(
        &self,
        id: ConversationId,
        viewer: &UserId,
    ) -> Result<(), StoreError> {
        let messages = self
            .messages
            .get(&id)
            .ok_or(StoreError::ConversationNotFound(id))?;

        let unread = messages
            .iter()
            .filter(|m| m.state != MessageState::Read && &m.sender_id != viewer)
            .count() as u32;
        let last = messages.last().cloned();
        drop(messages);

        let mut conversation = self
            .conversations
            .get_mut(&id)
            .ok_or(StoreError::ConversationNotFound(id))?;

        conversation.unread_count = unread;
        if let Some(last) = last {
            conversation.last_message = last.body;
            conversation.last_sender = Some(last.sender_id);
        }
        Ok(())
    }
}

/// In-memory token table.
#[derive(Debug, Default)]
pub struct MemoryAuthenticator {
    tokens: DashMap<String, UserId>,
}

impl MemoryAuthenticator {
    /// Create an empty token table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a token for a user.
    pub fn register(&self, token: impl Into<String>, user_id: impl Into<UserId>) {
        self.tokens.insert(token.into(), user_id.into());
    }
}

#[async_trait]
impl Authenticator for MemoryAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Option<UserId>, StoreError> {
        Ok(self.tokens.get(token).map(|u| u.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_fetch_conversation() {
        let store = MemoryStore::new();

        let id = store
            .create_conversation(&["alice".to_string(), "bob".to_string()])
            .await
            .unwrap();
        let conversation = store.conversation(id).await.unwrap().unwrap();

        assert_eq!(conversation.id, id);
        assert_eq!(conversation.members, vec!["alice", "bob"]);
        assert_eq!(conversation.unread_count, 0);
    }

    #[tokio::test]
    async fn test_append_and_find_by_guid() {
        let store = MemoryStore::new();
        let id = store
            .create_conversation(&["alice".to_string(), "bob".to_string()])
            .await
            .unwrap();

        let message = ChatMessage::new("g1", id, "alice", "hi");
        store.append_message(&message).await.unwrap();

        let found = store.message_by_guid("g1").await.unwrap().unwrap();
        assert_eq!(found.body, "hi");
        assert_eq!(found.state, MessageState::Sent);

        assert!(store.message_by_guid("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_unknown_conversation() {
        let store = MemoryStore::new();
        let message = ChatMessage::new("g1", 999, "alice", "hi");

        assert!(matches!(
            store.append_message(&message).await,
            Err(StoreError::ConversationNotFound(999))
        ));
    }

    #[tokio::test]
    async fn test_update_state_and_summary() {
        let store = MemoryStore::new();
        let alice = "alice".to_string();
        let bob = "bob".to_string();
        let id = store
            .create_conversation(&[alice.clone(), bob.clone()])
            .await
            .unwrap();

        store
            .append_message(&ChatMessage::new("g1", id, "alice", "one"))
            .await
            .unwrap();
        store
            .append_message(&ChatMessage::new("g2", id, "alice", "two"))
            .await
            .unwrap();

        assert_eq!(store.message_count(id), 2);

        // Two unread from bob's perspective
        store.refresh_summary(id, &bob).await.unwrap();
        let conversation = store.conversation(id).await.unwrap().unwrap();
        assert_eq!(conversation.unread_count, 2);
        assert_eq!(conversation.last_message, "two");
        assert_eq!(conversation.last_sender.as_deref(), Some("alice"));

        // Reading one drops the count
        assert!(store
            .update_message_state("g1", MessageState::Read)
            .await
            .unwrap());
        store.refresh_summary(id, &bob).await.unwrap();
        let conversation = store.conversation(id).await.unwrap().unwrap();
        assert_eq!(conversation.unread_count, 1);

        // Sender's own messages never count as unread for them
        store.refresh_summary(id, &alice).await.unwrap();
        let conversation = store.conversation(id).await.unwrap().unwrap();
        assert_eq!(conversation.unread_count, 0);
    }

    #[tokio::test]
    async fn test_directory_lookup() {
        let directory = MemoryDirectory::new();
        directory.insert(UserProfile::new("alice", "Alice").with_age(25));

        let profile = directory
            .profile(&"alice".to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(profile.display_name, "Alice");
        assert_eq!(profile.age, Some(25));

        assert!(directory
            .profile(&"nobody".to_string())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_authenticator() {
        let auth = MemoryAuthenticator::new();
        auth.register("tok-1", "alice");

        assert_eq!(
            auth.authenticate("tok-1").await.unwrap().as_deref(),
            Some("alice")
        );
        assert!(auth.authenticate("bogus").await.unwrap().is_none());
    }
}
