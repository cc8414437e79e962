//! Message delivery state machine and pending-cache orchestration.
//!
//! A sent message is staged in the short-TTL cache, fanned out to the
//! conversation group, and persisted in the background; the staged copy is
//! evicted only once the durable write confirms. State transitions
//! (Received, Read) look the guid up in the cache first and fall back to
//! the store, advance forward-only, and re-emit their confirmation event
//! even when the state had already advanced, so a reconnecting sender can
//! catch up from retries.

use crate::fanout::FanoutDispatcher;
use crate::group::GroupManager;
use crate::presence::PresenceRegistry;
use mingle_protocol::frames::ServerEvent;
use mingle_protocol::types::{ChatMessage, ConversationId, MessageState};
use mingle_store::traits::{ConversationStore, MessageCache, StoreError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Default time staged messages live without a confirmed durable write.
const DEFAULT_PENDING_TTL: Duration = Duration::from_secs(300);

/// Delivery engine tuning.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// TTL for staged messages awaiting persistence.
    pub pending_ttl: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            pending_ttl: DEFAULT_PENDING_TTL,
        }
    }
}

/// Delivery errors surfaced to the invoking connection.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// A durable write failed. The staged copy is kept for reconciliation
    /// and the write is not retried here.
    #[error(transparent)]
    Persistence(#[from] StoreError),
}

/// Advances messages through the Sent → Received → Read lifecycle.
pub struct DeliveryEngine {
    presence: Arc<PresenceRegistry>,
    groups: Arc<GroupManager>,
    fanout: Arc<FanoutDispatcher>,
    store: Arc<dyn ConversationStore>,
    cache: Arc<dyn MessageCache>,
    config: DeliveryConfig,
}

impl DeliveryEngine {
    /// Create an engine over the shared registries and collaborators.
    #[must_use]
    pub fn new(
        presence: Arc<PresenceRegistry>,
        groups: Arc<GroupManager>,
        fanout: Arc<FanoutDispatcher>,
        store: Arc<dyn ConversationStore>,
        cache: Arc<dyn MessageCache>,
        config: DeliveryConfig,
    ) -> Self {
        Self {
            presence,
            groups,
            fanout,
            store,
            cache,
            config,
        }
    }

    /// Accept a message from a connection and deliver it to its group.
    ///
    /// A silent no-op when the connection has no resolved user or the body
    /// is empty (unlike matchmaking, which raises on missing auth). The
    /// sender id and `Sent` state are forced from the authenticated
    /// context; the client-supplied guid is kept as the retry-stable
    /// correlation key. Persistence runs in the background: the staged
    /// cache entry is evicted on success and kept on failure.
    ///
    /// # Errors
    ///
    /// Returns an error only when staging in the cache fails.
    pub async fn send_message(
        &self,
        connection_id: &str,
        message: ChatMessage,
    ) -> Result<(), DeliveryError> {
        let Some(user_id) = self.presence.user_of(connection_id) else {
            debug!(connection = %connection_id, "Send from unauthenticated connection ignored");
            return Ok(());
        };
        if message.body.is_empty() {
            debug!(connection = %connection_id, "Empty message ignored");
            return Ok(());
        }

        let message = ChatMessage {
            sender_id: user_id.clone(),
            state: MessageState::Sent,
            ..message
        };

        self.cache
            .put(message.clone(), self.config.pending_ttl)
            .await?;

        let members = self.groups.members(message.conversation_id);
        self.fanout.send_to_many(
            &members,
            Some(connection_id),
            &ServerEvent::ReceiveMessage {
                message: message.clone(),
            },
        );

        let store = self.store.clone();
        let cache = self.cache.clone();
        tokio::spawn(async move {
            persist_sent(store, cache, message, user_id).await;
        });

        Ok(())
    }

    /// Advance a message to `Received` and notify the other members.
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
        self.advance(connection_id, conversation_id, guid, MessageState::Received)
            .await
    }

    /// Advance a message to `Read` and notify the other members.
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
        self.advance(connection_id, conversation_id, guid, MessageState::Read)
            .await
    }

    /// Shared forward-only transition path.
    ///
    /// Lookup order is pending cache, then durable store; a guid absent
    /// from both is tolerated silently (expired staging or
    /// cross-conversation noise). A store miss on the state write is also
    /// tolerated: the background append re-reads the cache and lands the
    /// advanced state.
    async fn advance(
        &self,
        connection_id: &str,
        conversation_id: ConversationId,
        guid: &str,
        target: MessageState,
    ) -> Result<(), DeliveryError> {
        let Some(user_id) = self.presence.user_of(connection_id) else {
            debug!(connection = %connection_id, "Mark from unauthenticated connection ignored");
            return Ok(());
        };

        let staged = self.cache.get(guid).await?;
        let mut message = match staged {
            Some(message) => message,
            None => match self.store.message_by_guid(guid).await? {
                Some(message) => message,
                None => {
                    debug!(
                        guid = %guid,
                        conversation = conversation_id,
                        "Mark for unknown message ignored"
                    );
                    return Ok(());
                }
            },
        };

        if message.state.can_advance_to(target) {
            message.state = target;
            self.cache.update_state(guid, target).await?;
            self.store.update_message_state(guid, target).await?;

            if target == MessageState::Read {
                self.store
                    .refresh_summary(message.conversation_id, &user_id)
                    .await?;
            }
        } else {
            // Repeat or out-of-order ack: keep state, still re-emit below.
            debug!(
                guid = %guid,
                state = ?message.state,
                target = ?target,
                "State not advanced"
            );
        }

        let event = match target {
            MessageState::Read => ServerEvent::MessageRead {
                message: message.clone(),
            },
            _ => ServerEvent::MessageReceived {
                message: message.clone(),
            },
        };

        let members = self.groups.members(message.conversation_id);
        self.fanout
            .send_to_many(&members, Some(connection_id), &event);

        Ok(())
    }
}

/// Background persistence of a sent message.
///
/// Re-reads the staged entry at write time so a mark that raced ahead of
/// this append lands with its advanced state. The staged entry survives a
/// failed write for later reconciliation.
async fn persist_sent(
    store: Arc<dyn ConversationStore>,
    cache: Arc<dyn MessageCache>,
    message: ChatMessage,
    sender_id: String,
) {
    let guid = message.guid.clone();
    let conversation_id = message.conversation_id;

    let latest = match cache.get(&guid).await {
        Ok(Some(staged)) => staged,
        _ => message,
    };

    if let Err(e) = store.append_message(&latest).await {
        warn!(guid = %guid, error = %e, "Message persistence failed; staged copy kept");
        return;
    }

    if let Err(e) = store.refresh_summary(conversation_id, &sender_id).await {
        warn!(conversation = conversation_id, error = %e, "Summary refresh failed");
    }

    if let Err(e) = cache.evict(&guid).await {
        warn!(guid = %guid, error = %e, "Cache eviction failed");
    }

    debug!(guid = %guid, conversation = conversation_id, "Message persisted");
}
