//! Domain value types shared between the hub core and the wire protocol.
//!
//! These types cross the wire verbatim, so they live next to the frame
//! definitions rather than in the core crate.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Transport-level connection identifier.
pub type ConnectionId = String;

/// Authenticated user identifier.
pub type UserId = String;

/// Store-generated conversation identifier.
pub type ConversationId = i64;

/// Current time as milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Delivery lifecycle stage of a message.
///
/// State only moves forward along Sent → Received → Read. `Error` is a
/// terminal path of its own and never advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageState {
    Sent,
    Received,
    Read,
    Error,
}

impl MessageState {
    /// Check whether a transition to `next` is a forward move.
    ///
    /// `Received` is reachable only from `Sent`; `Read` from `Sent` or
    /// `Received`. Everything else (including any move out of `Error`)
    /// is rejected.
    #[must_use]
    pub fn can_advance_to(self, next: MessageState) -> bool {
        matches!(
            (self, next),
            (MessageState::Sent, MessageState::Received)
                | (MessageState::Sent, MessageState::Read)
                | (MessageState::Received, MessageState::Read)
        )
    }
}

/// A chat message as exchanged with clients and persisted by the store.
///
/// The `guid` is client-generated and stable across transport retries; it
/// is the sole correlation key for delivery-state transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Client-generated globally-unique identifier.
    pub guid: String,
    /// Conversation the message belongs to.
    pub conversation_id: ConversationId,
    /// Authenticated sender.
    pub sender_id: UserId,
    /// Message body.
    pub body: String,
    /// Delivery lifecycle stage.
    pub state: MessageState,
    /// Client-side creation time, milliseconds since the Unix epoch.
    pub timestamp: u64,
}

impl ChatMessage {
    /// Create a new message in the `Sent` state, stamped now.
    #[must_use]
    pub fn new(
        guid: impl Into<String>,
        conversation_id: ConversationId,
        sender_id: impl Into<UserId>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            guid: guid.into(),
            conversation_id,
            sender_id: sender_id.into(),
            body: body.into(),
            state: MessageState::Sent,
            timestamp: now_millis(),
        }
    }

    /// Copy of this message with a different state.
    #[must_use]
    pub fn with_state(mut self, state: MessageState) -> Self {
        self.state = state;
        self
    }
}

/// Demographic search filters for matchmaking. Pure value, no identity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Whether the `[min_age, max_age]` range is applied.
    #[serde(default)]
    pub age_range_enabled: bool,
    /// Inclusive lower age bound.
    #[serde(default = "default_min_age")]
    pub min_age: u8,
    /// Inclusive upper age bound.
    #[serde(default = "default_max_age")]
    pub max_age: u8,
    /// Acceptable genders; empty means no constraint.
    #[serde(default)]
    pub gender_preferences: Vec<String>,
    /// Restrict candidates to within five years of the requester's age.
    #[serde(default)]
    pub same_age_group_only: bool,
}

fn default_min_age() -> u8 {
    18
}

fn default_max_age() -> u8 {
    100
}

/// A user's demographic profile, resolved via the directory collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User identifier.
    pub user_id: UserId,
    /// Name shown to other users.
    pub display_name: String,
    /// Age in years, if the user shared it.
    pub age: Option<u8>,
    /// Self-described gender, if the user shared it.
    pub gender: Option<String>,
}

impl UserProfile {
    /// Create a profile with only a display name.
    #[must_use]
    pub fn new(user_id: impl Into<UserId>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            age: None,
            gender: None,
        }
    }

    /// Set the age.
    #[must_use]
    pub fn with_age(mut self, age: u8) -> Self {
        self.age = Some(age);
        self
    }

    /// Set the gender.
    #[must_use]
    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = Some(gender.into());
        self
    }
}

/// Conversation summary row as the store keeps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    /// Store-generated identifier.
    pub id: ConversationId,
    /// Messages not yet read, excluding the viewer's own.
    pub unread_count: u32,
    /// Body of the most recent message.
    pub last_message: String,
    /// Sender of the most recent message.
    pub last_sender: Option<UserId>,
    /// User ids of the members.
    pub members: Vec<UserId>,
}

impl Conversation {
    /// Create an empty conversation with the given members.
    #[must_use]
    pub fn new(id: ConversationId, members: Vec<UserId>) -> Self {
        Self {
            id,
            unread_count: 0,
            last_message: String::new(),
            last_sender: None,
            members,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_forward_only() {
        use MessageState::*;

        assert!(Sent.can_advance_to(Received));
        assert!(Sent.can_advance_to(Read));
        assert!(Received.can_advance_to(Read));

        assert!(!Received.can_advance_to(Sent));
        assert!(!Read.can_advance_to(Received));
        assert!(!Read.can_advance_to(Read));
        assert!(!Error.can_advance_to(Received));
        assert!(!Error.can_advance_to(Read));
    }

    #[test]
    fn test_message_builder() {
        let msg = ChatMessage::new("g1", 7, "alice", "hi");
        assert_eq!(msg.guid, "g1");
        assert_eq!(msg.conversation_id, 7);
        assert_eq!(msg.state, MessageState::Sent);
        assert!(msg.timestamp > 0);

        let read = msg.clone().with_state(MessageState::Read);
        assert_eq!(read.state, MessageState::Read);
        assert_eq!(read.guid, msg.guid);
    }

    #[test]
    fn test_filter_defaults() {
        let filters: SearchFilters = serde_json::from_str("{}").unwrap();
        assert!(!filters.age_range_enabled);
        assert_eq!(filters.min_age, 18);
        assert_eq!(filters.max_age, 100);
        assert!(filters.gender_preferences.is_empty());
        assert!(!filters.same_age_group_only);
    }

    #[test]
    fn test_profile_builder() {
        let profile = UserProfile::new("u1", "Alice").with_age(25).with_gender("female");
        assert_eq!(profile.age, Some(25));
        assert_eq!(profile.gender.as_deref(), Some("female"));
    }
}
