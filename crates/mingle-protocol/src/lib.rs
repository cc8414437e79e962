//! # mingle-protocol
//!
//! Wire protocol definitions for the Mingle realtime chat hub.
//!
//! This crate defines the binary protocol used between Mingle clients and
//! the hub: the domain value types, the typed command and event unions,
//! the MessagePack codec, and protocol versioning.
//!
//! ## Frames
//!
//! - [`ClientCommand`] - `Connect`, `Join`/`Leave`, `Send`,
//!   `MarkReceived`/`MarkRead`, `Matchmake`, `Ping`
//! - [`ServerEvent`] - presence notifications, message delivery and
//!   state-transition events, matchmaking results, errors
//!
//! ## Example
//!
//! ```rust
//! use mingle_protocol::{codec, ClientCommand};
//!
//! let command = ClientCommand::Join { conversation_id: 7 };
//!
//! // Encode and decode
//! let encoded = codec::encode(&command).unwrap();
//! let decoded: ClientCommand = codec::decode(&encoded).unwrap();
//! assert_eq!(command, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod types;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{codes, ClientCommand, ServerEvent};
pub use types::{
    ChatMessage, ConnectionId, Conversation, ConversationId, MessageState, SearchFilters, UserId,
    UserProfile,
};
pub use version::{Version, PROTOCOL_VERSION};
