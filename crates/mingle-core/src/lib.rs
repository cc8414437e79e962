//! # mingle-core
//!
//! Presence, matchmaking, and message-delivery core for the Mingle hub.
//!
//! This crate provides the building blocks behind every client connection:
//!
//! - **PresenceRegistry** - live connection → authenticated user
//! - **GroupManager** - many-to-many conversation membership
//! - **Matchmaker** - snapshot-and-select random pairing with filters
//! - **DeliveryEngine** - Sent → Received → Read lifecycle over a staging
//!   cache and a durable store
//! - **FanoutDispatcher** - ordered event delivery to member connections
//! - **Hub** - the facade one connection task talks to
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌──────────────┐
//! │  Connection │────▶│     Hub     │────▶│   Fanout     │
//! └─────────────┘     └─────────────┘     └──────────────┘
//!                        │   │   │
//!          ┌─────────────┘   │   └────────────┐
//!          ▼                 ▼                ▼
//!   ┌────────────┐    ┌────────────┐   ┌────────────┐
//!   │  Presence  │    │ Matchmaker │   │  Delivery  │
//!   └────────────┘    └────────────┘   └────────────┘
//!                           │                │
//!                           ▼                ▼
//!                     profile/store    store + cache
//! ```

pub mod delivery;
pub mod fanout;
pub mod group;
pub mod hub;
pub mod matchmake;
pub mod presence;

pub use delivery::{DeliveryConfig, DeliveryEngine, DeliveryError};
pub use fanout::{EventSink, EventStream, FanoutDispatcher};
pub use group::{GroupError, GroupManager};
pub use hub::{Hub, HubConfig, HubStats};
pub use matchmake::{MatchError, Matchmaker};
pub use presence::PresenceRegistry;
