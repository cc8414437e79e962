//! # mingle-store
//!
//! Collaborator seams for the Mingle hub, plus in-process reference
//! implementations.
//!
//! The hub core consumes everything stateful-but-external through the
//! traits in [`traits`]:
//!
//! - **ProfileDirectory** - user id → demographics and display name
//! - **ConversationStore** - durable conversations and messages
//! - **MessageCache** - short-TTL staging keyed by message guid
//! - **Authenticator** - session token → user id, or null
//!
//! The [`memory`] and [`cache`] modules provide DashMap-backed
//! implementations used by the default server wiring and the test suites.

pub mod cache;
pub mod memory;
pub mod traits;

pub use cache::MemoryCache;
pub use memory::{MemoryAuthenticator, MemoryDirectory, MemoryStore};
pub use traits::{
    Authenticator, ConversationStore, MessageCache, ProfileDirectory, StoreError,
};
