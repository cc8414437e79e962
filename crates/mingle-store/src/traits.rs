//! Collaborator seams consumed by the hub core.
//!
//! These traits define the interface to everything the hub treats as an
//! external collaborator: profile lookup, durable conversation/message
//! storage, the short-TTL pending cache, and the authentication context.
//! The hub never assumes a concrete backend.

use async_trait::async_trait;
use mingle_protocol::types::{
    ChatMessage, Conversation, ConversationId, MessageState, UserId, UserProfile,
};
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by store collaborators.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Durable write failed.
    #[error("Persistence failure: {0}")]
    Persistence(String),

    /// Referenced conversation does not exist.
    #[error("Conversation not found: {0}")]
    ConversationNotFound(ConversationId),

    /// Backend unavailable or misbehaving.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Profile lookup collaborator (id → demographics and display name).
#[async_trait]
pub trait ProfileDirectory: Send + Sync {
    /// Resolve the profile for a user, if one exists.
    async fn profile(&self, user_id: &UserId) -> Result<Option<UserProfile>, StoreError>;
}

/// Durable conversation and message store.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create a new conversation with the given members and return its id.
    async fn create_conversation(&self, members: &[UserId]) -> Result<ConversationId, StoreError>;

    /// Fetch a conversation summary.
    async fn conversation(&self, id: ConversationId) -> Result<Option<Conversation>, StoreError>;

    /// Append a message to its conversation.
    async fn append_message(&self, message: &ChatMessage) -> Result<(), StoreError>;

    /// Look up a message by its client-generated guid.
    async fn message_by_guid(&self, guid: &str) -> Result<Option<ChatMessage>, StoreError>;

    /// Set the state of the message with the given guid.
    ///
    /// Returns `false` when no such message is stored yet; callers tolerate
    /// this while the initial append is still in flight.
    async fn update_message_state(
        &self,
        guid: &str,
        state: MessageState,
    ) -> Result<bool, StoreError>;

    /// Recompute the conversation summary from the viewer's perspective:
    /// unread count (messages not yet read that the viewer did not send)
    /// and the last-message snapshot.
    async fn refresh_summary(
        &self,
        id: ConversationId,
        viewer: &UserId,
    ) -> Result<(), StoreError>;
}

/// Short-TTL staging cache keyed by message guid.
///
/// Entries bridge the window between fanout and confirmed durable
/// persistence; they expire on their own if persistence never confirms.
#[async_trait]
pub trait MessageCache: Send + Sync {
    /// Stage a message under its guid with the given time-to-live.
    async fn put(&self, message: ChatMessage, ttl: Duration) -> Result<(), StoreError>;

    /// Fetch a staged message, if present and not expired.
    async fn get(&self, guid: &str) -> Result<Option<ChatMessage>, StoreError>;

    /// Update the state of a staged message.
    ///
    /// Returns `false` when the guid is not staged.
    async fn update_state(&self, guid: &str, state: MessageState) -> Result<bool, StoreError>;

    /// Drop a staged message.
    async fn evict(&self, guid: &str) -> Result<(), StoreError>;

    /// Remove expired entries, returning how many were dropped.
    async fn purge_expired(&self) -> Result<usize, StoreError>;
}

/// Authentication context: resolves a session token to a user id, or null.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Resolve `token` to a user id; `None` means the connection stays
    /// anonymous.
    async fn authenticate(&self, token: &str) -> Result<Option<UserId>, StoreError>;
}
