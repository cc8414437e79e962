//! Event fanout to connected clients.
//!
//! The dispatcher owns nothing but the per-connection event sinks; ordering
//! is its whole contract. Events for one conversation are enqueued to each
//! member in the order the delivery engine committed them, and no
//! reordering buffer sits between commit and enqueue.

use dashmap::DashMap;
use mingle_protocol::frames::ServerEvent;
use mingle_protocol::types::ConnectionId;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Sending half of a connection's event queue.
pub type EventSink = mpsc::UnboundedSender<ServerEvent>;

/// Receiving half handed to the connection's transport task.
pub type EventStream = mpsc::UnboundedReceiver<ServerEvent>;

/// Routes server events to live connections.
///
/// A send to a connection that has vanished (or whose receiver is gone) is
/// dropped silently: the disconnect path owns cleanup, and one dead member
/// must never abort delivery to the rest.
#[derive(Debug, Default)]
pub struct FanoutDispatcher {
    sinks: DashMap<ConnectionId, EventSink>,
}

impl FanoutDispatcher {
    /// Create a dispatcher with no registered connections.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return the stream its transport drains.
    pub fn register(&self, connection_id: impl Into<ConnectionId>) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn_id = connection_id.into();
        self.sinks.insert(conn_id.clone(), tx);
        debug!(connection = %conn_id, "Fanout sink registered");
        rx
    }

    /// Drop a connection's sink.
    pub fn unregister(&self, connection_id: &str) {
        if self.sinks.remove(connection_id).is_some() {
            debug!(connection = %connection_id, "Fanout sink unregistered");
        }
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.sinks.len()
    }

    /// Deliver an event to a single connection.
    ///
    /// Returns `true` if the connection had a live sink.
    pub fn send_to(&self, connection_id: &str, event: ServerEvent) -> bool {
        match self.sinks.get(connection_id) {
            Some(sink) => sink.send(event).is_ok(),
            None => {
                trace!(connection = %connection_id, "Fanout to vanished connection dropped");
                false
            }
        }
    }

    /// Deliver an event to a set of members, optionally skipping one.
    ///
    /// Returns the number of connections reached.
    pub fn send_to_many(
        &self,
        members: &[ConnectionId],
        except: Option<&str>,
        event: &ServerEvent,
    ) -> usize {
        let mut reached = 0;
        for member in members {
            if Some(member.as_str()) == except {
                continue;
            }
            if self.send_to(member, event.clone()) {
                reached += 1;
            }
        }
        reached
    }

    /// Deliver an event to every registered connection except one.
    ///
    /// Returns the number of connections reached.
    pub fn broadcast_others(&self, except: &str, event: &ServerEvent) -> usize {
        let mut reached = 0;
        for entry in self.sinks.iter() {
            if entry.key() == except {
                continue;
            }
            if entry.value().send(event.clone()).is_ok() {
                reached += 1;
            }
        }
        reached
    }
}
