//! Frame types for the Mingle protocol.
//!
//! Clients send a typed command union; the hub pushes a typed event union
//! back. Both are serialized with MessagePack and routed through a single
//! handler switch on the server.

use crate::types::{ChatMessage, ConversationId, SearchFilters, UserId};
use serde::{Deserialize, Serialize};

/// Wire error codes sent in [`ServerEvent::Error`].
pub mod codes {
    /// Operation requires an authenticated user.
    pub const UNAUTHENTICATED: u16 = 1401;
    /// No present user satisfied the matchmaking filters.
    pub const NO_CANDIDATES: u16 = 1404;
    /// The selected partner disconnected before pairing completed.
    pub const PARTNER_UNAVAILABLE: u16 = 1410;
    /// A required profile could not be resolved.
    pub const PROFILE_NOT_FOUND: u16 = 1412;
    /// Conversation membership limit reached.
    pub const GROUP_LIMIT: u16 = 1429;
    /// Durable write failed.
    pub const PERSISTENCE: u16 = 1500;
    /// Malformed or unexpected frame.
    pub const PROTOCOL: u16 = 1002;
}

/// A command sent by a client over its connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientCommand {
    /// Initial handshake carrying the session token, if any.
    #[serde(rename = "connect")]
    Connect {
        /// Opaque session token; absent for anonymous connections.
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Join a conversation group.
    #[serde(rename = "join")]
    Join {
        /// Conversation to join.
        conversation_id: ConversationId,
    },

    /// Leave a conversation group.
    #[serde(rename = "leave")]
    Leave {
        /// Conversation to leave.
        conversation_id: ConversationId,
    },

    /// Send a message to a conversation.
    #[serde(rename = "send")]
    Send {
        /// The message; `guid` must be client-unique and retry-stable.
        message: ChatMessage,
    },

    /// Acknowledge that a message reached this device.
    #[serde(rename = "mark_received")]
    MarkReceived {
        /// Conversation the message belongs to.
        conversation_id: ConversationId,
        /// Guid of the message being acknowledged.
        guid: String,
    },

    /// Acknowledge that a message was read.
    #[serde(rename = "mark_read")]
    MarkRead {
        /// Conversation the message belongs to.
        conversation_id: ConversationId,
        /// Guid of the message being acknowledged.
        guid: String,
    },

    /// Request a random chat partner.
    #[serde(rename = "matchmake")]
    Matchmake {
        /// Optional demographic filters.
        #[serde(skip_serializing_if = "Option::is_none")]
        filters: Option<SearchFilters>,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp echoed back in the pong.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

/// An event pushed by the hub to a client connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Handshake acknowledgment.
    #[serde(rename = "connected")]
    Connected {
        /// Unique connection identifier.
        connection_id: String,
        /// Negotiated protocol version (major).
        version: u8,
    },

    /// Snapshot of all active user ids, sent to the caller on connect.
    #[serde(rename = "active_users")]
    ActiveUsers {
        /// Distinct user ids with at least one open connection.
        user_ids: Vec<UserId>,
    },

    /// A user came online, or joined a conversation the receiver is in.
    #[serde(rename = "user_connected")]
    UserConnected {
        /// User that connected; absent for anonymous group joins.
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
        /// Name to show for the user.
        display_name: String,
    },

    /// A user went offline, or left a conversation the receiver is in.
    #[serde(rename = "user_disconnected")]
    UserDisconnected {
        /// User that disconnected.
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
    },

    /// A new message for a conversation the receiver is a member of.
    #[serde(rename = "receive_message")]
    ReceiveMessage {
        /// The message, state `Sent`.
        message: ChatMessage,
    },

    /// A message advanced to `Received`.
    #[serde(rename = "message_received")]
    MessageReceived {
        /// Full updated message.
        message: ChatMessage,
    },

    /// A message advanced to `Read`.
    #[serde(rename = "message_read")]
    MessageRead {
        /// Full updated message.
        message: ChatMessage,
    },

    /// Matchmaking succeeded; sent to the requester only.
    #[serde(rename = "match_found")]
    MatchFound {
        /// The newly created conversation.
        conversation_id: ConversationId,
    },

    /// An operation failed; delivered only to the invoking connection.
    #[serde(rename = "error")]
    Error {
        /// One of the [`codes`] constants.
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from the ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl ServerEvent {
    /// Create an error event.
    #[must_use]
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            code,
            message: message.into(),
        }
    }

    /// Create a user-connected event.
    #[must_use]
    pub fn user_connected(user_id: Option<UserId>, display_name: impl Into<String>) -> Self {
        ServerEvent::UserConnected {
            user_id,
            display_name: display_name.into(),
        }
    }
}
