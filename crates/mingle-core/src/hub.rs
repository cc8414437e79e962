//! The hub facade.
//!
//! One `Hub` owns the presence registry, group manager, fanout dispatcher,
//! matchmaker, and delivery engine, wired to the injected collaborators.
//! It is constructed explicitly at process start and shared by `Arc`; every
//! inbound client command routes through exactly one of its methods.

use crate::delivery::{DeliveryConfig, DeliveryEngine, DeliveryError};
use crate::fanout::{EventStream, FanoutDispatcher};
use crate::group::{GroupError, GroupManager};
use crate::matchmake::{MatchError, Matchmaker};
use crate::presence::PresenceRegistry;
use mingle_protocol::frames::ServerEvent;
use mingle_protocol::types::{ChatMessage, ConversationId, SearchFilters, UserId};
use mingle_store::traits::{ConversationStore, MessageCache, ProfileDirectory};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Display name used when a connection has no resolvable profile.
const ANONYMOUS: &str = "Anonymous";

/// Hub tuning.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// TTL for staged messages awaiting persistence.
    pub pending_ttl: Duration,
    /// Cap on conversations per connection.
    pub max_conversations_per_connection: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            pending_ttl: Duration::from_secs(300),
            max_conversations_per_connection: 100,
        }
    }
}

/// Hub statistics snapshot.
#[derive(Debug, Clone)]
pub struct HubStats {
    /// Connections with a registered event sink.
    pub connections: usize,
    /// Distinct users with at least one authenticated connection.
    pub present_users: usize,
    /// Conversation groups with at least one member.
    pub groups: usize,
}

/// Process-wide realtime hub.
pub struct Hub {
    presence: Arc<PresenceRegistry>,
    groups: Arc<GroupManager>,
    fanout: Arc<FanoutDispatcher>,
    matchmaker: Matchmaker,
    delivery: DeliveryEngine,
    profiles: Arc<dyn ProfileDirectory>,
}

impl Hub {
    /// Create a hub with default tuning.
    #[must_use]
    pub fn new(
        profiles: Arc<dyn ProfileDirectory>,
        store: Arc<dyn ConversationStore>,
        cache: Arc<dyn MessageCache>,
    ) -> Self {
        Self::with_config(profiles, store, cache, HubConfig::default())
    }

    /// Create a hub with custom tuning.
    #[must_use]
    pub fn with_config(
        profiles: Arc<dyn ProfileDirectory>,
        store: Arc<dyn ConversationStore>,
        cache: Arc<dyn MessageCache>,
        config: HubConfig,
    ) -> Self {
        info!(
            pending_ttl_secs = config.pending_ttl.as_secs(),
            max_conversations = config.max_conversations_per_connection,
            "Creating hub"
        );

        let presence = Arc::new(PresenceRegistry::new());
        let groups = Arc::new(GroupManager::with_limit(
            config.max_conversations_per_connection,
        ));
        let fanout = Arc::new(FanoutDispatcher::new());

        let matchmaker = Matchmaker::new(
            presence.clone(),
            groups.clone(),
            profiles.clone(),
            store.clone(),
        );
        let delivery = DeliveryEngine::new(
            presence.clone(),
            groups.clone(),
            fanout.clone(),
            store,
            cache,
            DeliveryConfig {
                pending_ttl: config.pending_ttl,
            },
        );

        Self {
            presence,
            groups,
            fanout,
            matchmaker,
            delivery,
            profiles,
        }
    }

    /// Register a connection and return the event stream its transport
    /// drains.
    ///
    /// When a user id resolves to a profile with a display name, the
    /// connection is registered as present: everyone else gets
    /// `UserConnected` and the caller gets the `ActiveUsers` snapshot.
    /// Otherwise the connection stays anonymous; it can still join groups,
    /// but send/mark are silent no-ops and matchmaking raises.
    pub async fn connect(&self, connection_id: &str, user_id: Option<&str>) -> EventStream {
        let events = self.fanout.register(connection_id);

        if let Some(user_id) = user_id {
            match self.profiles.profile(&user_id.to_string()).await {
                Ok(Some(profile)) if !profile.display_name.is_empty() => {
                    self.presence.join(connection_id, user_id);
                    self.fanout.broadcast_others(
                        connection_id,
                        &ServerEvent::user_connected(
                            Some(user_id.to_string()),
                            profile.display_name,
                        ),
                    );
                    self.fanout.send_to(
                        connection_id,
                        ServerEvent::ActiveUsers {
                            user_ids: self.presence.active_users(),
                        },
                    );
                }
                Ok(_) => {
                    debug!(connection = %connection_id, user = %user_id, "No display name; connection stays anonymous");
                }
                Err(e) => {
                    warn!(connection = %connection_id, error = %e, "Profile lookup failed on connect");
                }
            }
        }

        events
    }

    /// Tear a connection down: group membership, presence, event sink.
    ///
    /// Safe to run concurrently with in-flight send/mark for the same
    /// connection; fanout to the removed sink is dropped silently.
    pub fn disconnect(&self, connection_id: &str) {
        self.groups.leave_all(connection_id);

        if let Some(user_id) = self.presence.leave(connection_id) {
            self.fanout.broadcast_others(
                connection_id,
                &ServerEvent::UserDisconnected {
                    user_id: Some(user_id),
                },
            );
        }

        self.fanout.unregister(connection_id);
        debug!(connection = %connection_id, "Disconnected");
    }

    /// Join a conversation group and notify its members (caller included).
    ///
    /// # Errors
    ///
    /// Returns an error when the connection is at its conversation cap.
    pub async fn join_chat(
        &self,
        connection_id: &str,
        conversation_id: ConversationId,
    ) -> Result<(), GroupError> {
        self.groups.join(connection_id, conversation_id)?;

        let user_id = self.presence.user_of(connection_id);
        let display_name = match &user_id {
            Some(user) => match self.profiles.profile(user).await {
                Ok(Some(profile)) if !profile.display_name.is_empty() => profile.display_name,
                _ => ANONYMOUS.to_string(),
            },
            None => ANONYMOUS.to_string(),
        };

        let members = self.groups.members(conversation_id);
        self.fanout.send_to_many(
            &members,
            None,
            &ServerEvent::user_connected(user_id, display_name),
        );
        Ok(())
    }

    /// Leave a conversation group and notify the remaining members.
    pub fn leave_chat(&self, connection_id: &str, conversation_id: ConversationId) {
        let user_id = self.presence.user_of(connection_id);

        if self.groups.leave(connection_id, conversation_id) {
            let members = self.groups.members(conversation_id);
            self.fanout
                .send_to_many(&members, None, &ServerEvent::UserDisconnected { user_id });
        }
    }

    /// Send a message into its conversation.
    ///
    /// # Errors
    ///
    /// Returns an error when staging fails; unauthenticated senders and
    /// empty bodies are silent no-ops.
    pub async fn send_message(
        &self,
        connection_id: &str,
        message: ChatMessage,
    ) -> Result<(), DeliveryError> {
        self.delivery.send_message(connection_id, message).await
    }

    /// Advance a message to `Received`.
    ///
    /// # Errors
    ///
    /// Returns an error when the durable state write fails.
    pub async fn mark_received(
        &self,
        connection_id: &str,
        conversation_id: ConversationId,
        guid: &str,
    ) -> Result<(), DeliveryError> {
        self.delivery
            .mark_received(connection_id, conversation_id, guid)
            .await
    }

    /// Advance a message to `Read`.
    ///
    /// # Errors
    ///
    /// Returns an error when the durable state write fails.
    pub async fn mark_read(
        &self,
        connection_id: &str,
        conversation_id: ConversationId,
        guid: &str,
    ) -> Result<(), DeliveryError> {
        self.delivery
            .mark_read(connection_id, conversation_id, guid)
            .await
    }

    /// Pair the requesting connection with a random eligible present user.
    ///
    /// # Errors
    ///
    /// See [`MatchError`]; unlike send/mark, a missing user id raises
    /// [`MatchError::Unauthenticated`].
    pub async fn find_random_chat(
        &self,
        connection_id: &str,
        filters: Option<&SearchFilters>,
    ) -> Result<ConversationId, MatchError> {
        self.matchmaker.find_match(connection_id, filters).await
    }

    /// Users currently present.
    #[must_use]
    pub fn active_users(&self) -> Vec<UserId> {
        self.presence.active_users()
    }

    /// Hub statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            connections: self.fanout.connection_count(),
            present_users: self.presence.active_users().len(),
            groups: self.groups.group_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fanout::EventStream;
    use mingle_protocol::types::{ChatMessage, MessageState, UserProfile};
    use mingle_store::{MemoryCache, MemoryDirectory, MemoryStore};

    struct Fixture {
        directory: Arc<MemoryDirectory>,
        store: Arc<MemoryStore>,
        hub: Hub,
    }

    fn fixture() -> Fixture {
        let directory = Arc::new(MemoryDirectory::new());
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let hub = Hub::new(
            directory.clone() as Arc<dyn ProfileDirectory>,
            store.clone() as Arc<dyn ConversationStore>,
            cache as Arc<dyn MessageCache>,
        );
        Fixture {
            directory,
            store,
            hub,
        }
    }

    fn drain(rx: &mut EventStream) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn wait_until<F, Fut>(mut condition: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met within timeout");
    }

    #[tokio::test]
    async fn test_connect_presence_events() {
        let fx = fixture();
        fx.directory.insert(UserProfile::new("alice", "Alice"));
        fx.directory.insert(UserProfile::new("bob", "Bob"));

        let mut rx_a = fx.hub.connect("conn-a", Some("alice")).await;
        let events = drain(&mut rx_a);
        match events.as_slice() {
            [ServerEvent::ActiveUsers { user_ids }] => assert_eq!(user_ids, &["alice"]),
            other => panic!("unexpected events: {other:?}"),
        }

        let mut rx_b = fx.hub.connect("conn-b", Some("bob")).await;

        // Existing connection hears about the newcomer
        let events = drain(&mut rx_a);
        match events.as_slice() {
            [ServerEvent::UserConnected {
                user_id,
                display_name,
            }] => {
                assert_eq!(user_id.as_deref(), Some("bob"));
                assert_eq!(display_name, "Bob");
            }
            other => panic!("unexpected events: {other:?}"),
        }

        // Newcomer gets the full snapshot
        let events = drain(&mut rx_b);
        match events.as_slice() {
            [ServerEvent::ActiveUsers { user_ids }] => {
                assert_eq!(user_ids, &["alice", "bob"]);
            }
            other => panic!("unexpected events: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_disconnect_notifies_others() {
        let fx = fixture();
        fx.directory.insert(UserProfile::new("alice", "Alice"));
        fx.directory.insert(UserProfile::new("bob", "Bob"));

        let mut rx_a = fx.hub.connect("conn-a", Some("alice")).await;
        let _rx_b = fx.hub.connect("conn-b", Some("bob")).await;
        drain(&mut rx_a);

        fx.hub.disconnect("conn-b");

        let events = drain(&mut rx_a);
        match events.as_slice() {
            [ServerEvent::UserDisconnected { user_id }] => {
                assert_eq!(user_id.as_deref(), Some("bob"));
            }
            other => panic!("unexpected events: {other:?}"),
        }
        assert_eq!(fx.hub.active_users(), vec!["alice"]);
    }

    #[tokio::test]
    async fn test_unknown_user_stays_anonymous() {
        let fx = fixture();

        let _rx = fx.hub.connect("conn-x", Some("nobody")).await;
        assert!(fx.hub.active_users().is_empty());

        // Anonymous connections can still join groups
        let id = fx
            .store
            .create_conversation(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        fx.hub.join_chat("conn-x", id).await.unwrap();
        assert_eq!(fx.hub.stats().groups, 1);
    }

    #[tokio::test]
    async fn test_join_chat_announces_with_fallback_name() {
        let fx = fixture();
        fx.directory.insert(UserProfile::new("alice", "Alice"));

        let mut rx_a = fx.hub.connect("conn-a", Some("alice")).await;
        let mut rx_x = fx.hub.connect("conn-x", None).await;
        drain(&mut rx_a);

        let id = fx
            .store
            .create_conversation(&["alice".to_string()])
            .await
            .unwrap();
        fx.hub.join_chat("conn-a", id).await.unwrap();
        fx.hub.join_chat("conn-x", id).await.unwrap();

        // The anonymous join is announced to the whole group with the
        // fallback display name
        let events = drain(&mut rx_a);
        assert!(events.iter().any(|event| matches!(
            event,
            ServerEvent::UserConnected { user_id: None, display_name } if display_name == "Anonymous"
        )));
        drain(&mut rx_x);

        fx.hub.leave_chat("conn-x", id);
        let events = drain(&mut rx_a);
        assert!(events
            .iter()
            .any(|event| matches!(event, ServerEvent::UserDisconnected { user_id: None })));
    }

    #[tokio::test]
    async fn test_full_message_lifecycle() {
        let fx = fixture();
        fx.directory.insert(UserProfile::new("alice", "Alice"));
        fx.directory.insert(UserProfile::new("bob", "Bob"));

        let mut rx_a = fx.hub.connect("conn-a", Some("alice")).await;
        let mut rx_b = fx.hub.connect("conn-b", Some("bob")).await;

        let id = fx
            .store
            .create_conversation(&["alice".to_string(), "bob".to_string()])
            .await
            .unwrap();
        fx.hub.join_chat("conn-a", id).await.unwrap();
        fx.hub.join_chat("conn-b", id).await.unwrap();
        drain(&mut rx_a);
        drain(&mut rx_b);

        // A sends g1
        fx.hub
            .send_message("conn-a", ChatMessage::new("g1", id, "alice", "hi"))
            .await
            .unwrap();

        let events = drain(&mut rx_b);
        match events.as_slice() {
            [ServerEvent::ReceiveMessage { message }] => {
                assert_eq!(message.guid, "g1");
                assert_eq!(message.body, "hi");
            }
            other => panic!("unexpected events: {other:?}"),
        }

        wait_until(|| async { fx.store.message_by_guid("g1").await.unwrap().is_some() }).await;

        // B acknowledges receipt, then read
        fx.hub.mark_received("conn-b", id, "g1").await.unwrap();
        fx.hub.mark_read("conn-b", id, "g1").await.unwrap();

        let events = drain(&mut rx_a);
        match events.as_slice() {
            [ServerEvent::MessageReceived { message: first }, ServerEvent::MessageRead { message: second }] =>
            {
                assert_eq!(first.guid, "g1");
                assert_eq!(first.state, MessageState::Received);
                assert_eq!(second.guid, "g1");
                assert_eq!(second.state, MessageState::Read);
            }
            other => panic!("expected Received then Read, got {other:?}"),
        }

        // Durable store shows the final state
        let stored = fx.store.message_by_guid("g1").await.unwrap().unwrap();
        assert_eq!(stored.state, MessageState::Read);
    }

    #[tokio::test]
    async fn test_matchmaking_via_hub() {
        let fx = fixture();
        fx.directory
            .insert(UserProfile::new("alice", "Alice").with_age(25).with_gender("male"));
        fx.directory
            .insert(UserProfile::new("bob", "Bob").with_age(27).with_gender("female"));

        let _rx_a = fx.hub.connect("conn-a", Some("alice")).await;
        let _rx_b = fx.hub.connect("conn-b", Some("bob")).await;

        let filters = SearchFilters {
            age_range_enabled: true,
            min_age: 20,
            max_age: 30,
            gender_preferences: vec!["female".to_string()],
            same_age_group_only: false,
        };
        let id = fx
            .hub
            .find_random_chat("conn-a", Some(&filters))
            .await
            .unwrap();

        let conversation = fx.store.conversation(id).await.unwrap().unwrap();
        let mut members = conversation.members;
        members.sort();
        assert_eq!(members, vec!["alice", "bob"]);

        // Unauthenticated matchmaking raises, unlike send/mark
        let _rx_x = fx.hub.connect("conn-x", None).await;
        assert!(matches!(
            fx.hub.find_random_chat("conn-x", None).await,
            Err(MatchError::Unauthenticated)
        ));
    }
}
