//! Connection handlers for the Mingle server.
//!
//! This module handles the connection lifecycle: the Connect handshake,
//! the per-connection select loop multiplexing hub events and inbound
//! commands, and the single switch routing each command into the hub.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use bytes::BytesMut;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use mingle_core::{Hub, HubConfig, MatchError};
use mingle_protocol::{codec, codes, ClientCommand, ServerEvent, PROTOCOL_VERSION};
use mingle_store::traits::{Authenticator, MessageCache};
use mingle_store::{MemoryAuthenticator, MemoryCache, MemoryDirectory, MemoryStore};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// How long a connection may sit without completing the handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared server state.
pub struct AppState {
    /// The realtime hub.
    pub hub: Hub,
    /// Authentication context.
    pub auth: Arc<dyn Authenticator>,
    /// Pending cache, shared with the hub; kept here for the sweeper.
    pub cache: Arc<dyn MessageCache>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create app state with the in-process reference collaborators.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let directory = Arc::new(MemoryDirectory::new());
        let store = Arc::new(MemoryStore::new());
        let cache: Arc<dyn MessageCache> = Arc::new(MemoryCache::new());
        let auth: Arc<dyn Authenticator> = Arc::new(MemoryAuthenticator::new());

        let hub = Hub::with_config(
            directory,
            store,
            cache.clone(),
            HubConfig {
                pending_ttl: Duration::from_secs(config.pending.ttl_secs),
                max_conversations_per_connection: config.limits.max_conversations_per_connection,
            },
        );

        Self {
            hub,
            auth,
            cache,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    spawn_pending_sweeper(
        state.cache.clone(),
        Duration::from_secs(config.pending.sweep_interval_secs),
    );

    // Build router
    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Mingle server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically reclaim staged messages whose TTL lapsed.
fn spawn_pending_sweeper(cache: Arc<dyn MessageCache>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match cache.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => metrics::record_pending_purged(purged),
                Err(e) => warn!(error = %e, "Pending sweep failed"),
            }
        }
    });
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    // Generate connection ID
    let connection_id = format!(
        "conn_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    );

    debug!(connection = %connection_id, "WebSocket connected");

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    // Read buffer for partial frames
    let mut read_buffer = BytesMut::with_capacity(4096);

    // The first decoded frame must be Connect
    let token = match tokio::time::timeout(
        HANDSHAKE_TIMEOUT,
        await_connect(&mut receiver, &mut read_buffer),
    )
    .await
    {
        Ok(Some(token)) => token,
        Ok(None) => {
            debug!(connection = %connection_id, "Closed before handshake");
            return;
        }
        Err(_) => {
            warn!(connection = %connection_id, "Handshake timed out");
            return;
        }
    };

    // Resolve the user behind the token; null keeps the connection anonymous
    let user_id = match &token {
        Some(token) => match state.auth.authenticate(token).await {
            Ok(user_id) => user_id,
            Err(e) => {
                warn!(connection = %connection_id, error = %e, "Authentication lookup failed");
                None
            }
        },
        None => None,
    };

    let mut events = state.hub.connect(&connection_id, user_id.as_deref()).await;

    let connected = ServerEvent::Connected {
        connection_id: connection_id.clone(),
        version: PROTOCOL_VERSION.major,
    };
    if send_event(&mut sender, &connected).await.is_err() {
        error!(connection = %connection_id, "Failed to send Connected event");
        state.hub.disconnect(&connection_id);
        return;
    }

    // Message processing loop
    loop {
        tokio::select! {
            biased;

            // Push hub events to the client
            Some(event) = events.recv() => {
                if send_event(&mut sender, &event).await.is_err() {
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let start = Instant::now();
                        read_buffer.extend_from_slice(&data);

                        // Try to decode commands
                        loop {
                            match codec::decode_from::<ClientCommand>(&mut read_buffer) {
                                Ok(Some(command)) => {
                                    if let Err(e) = handle_command(
                                        command,
                                        &connection_id,
                                        &state,
                                        &mut sender,
                                    ).await {
                                        error!(connection = %connection_id, error = %e, "Command handling error");
                                        break;
                                    }
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    warn!(connection = %connection_id, error = %e, "Protocol error");
                                    metrics::record_error("protocol");
                                    let _ = send_event(
                                        &mut sender,
                                        &ServerEvent::error(codes::PROTOCOL, e.to_string()),
                                    ).await;
                                    read_buffer.clear();
                                    break;
                                }
                            }
                        }

                        metrics::record_latency(start.elapsed().as_secs_f64());
                    }
                    Some(Ok(Message::Text(_))) => {
                        // Binary protocol only
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: groups, presence, event sink
    state.hub.disconnect(&connection_id);
    metrics::set_active_groups(state.hub.stats().groups);

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Drain frames until the client sends its Connect command.
///
/// Returns `None` when the socket closes first; frames arriving before the
/// handshake are ignored.
async fn await_connect(
    receiver: &mut SplitStream<WebSocket>,
    read_buffer: &mut BytesMut,
) -> Option<Option<String>> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => {
                read_buffer.extend_from_slice(&data);
                while let Ok(Some(command)) = codec::decode_from::<ClientCommand>(read_buffer) {
                    match command {
                        ClientCommand::Connect { token } => return Some(token),
                        other => {
                            debug!(command = ?other, "Frame before handshake ignored");
                        }
                    }
                }
            }
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Route one decoded command into the hub.
async fn handle_command(
    command: ClientCommand,
    connection_id: &str,
    state: &Arc<AppState>,
    sender: &mut SplitSink<WebSocket, Message>,
) -> Result<()> {
    metrics::record_command(command_kind(&command));

    match command {
        ClientCommand::Connect { .. } => {
            debug!(connection = %connection_id, "Connect frame (already connected)");
        }

        ClientCommand::Join { conversation_id } => {
            debug!(connection = %connection_id, conversation = conversation_id, "Join request");

            if let Err(e) = state.hub.join_chat(connection_id, conversation_id).await {
                warn!(connection = %connection_id, error = %e, "Join failed");
                send_event(sender, &ServerEvent::error(codes::GROUP_LIMIT, e.to_string()))
                    .await?;
            }
            metrics::set_active_groups(state.hub.stats().groups);
        }

        ClientCommand::Leave { conversation_id } => {
            debug!(connection = %connection_id, conversation = conversation_id, "Leave request");
            state.hub.leave_chat(connection_id, conversation_id);
            metrics::set_active_groups(state.hub.stats().groups);
        }

        ClientCommand::Send { message } => {
            if message.body.len() > state.config.limits.max_body_bytes {
                send_event(
                    sender,
                    &ServerEvent::error(codes::PROTOCOL, "Message body too large"),
                )
                .await?;
                return Ok(());
            }

            if let Err(e) = state.hub.send_message(connection_id, message).await {
                metrics::record_error("delivery");
                send_event(sender, &ServerEvent::error(codes::PERSISTENCE, e.to_string()))
                    .await?;
            }
        }

        ClientCommand::MarkReceived {
            conversation_id,
            guid,
        } => {
            if let Err(e) = state
                .hub
                .mark_received(connection_id, conversation_id, &guid)
                .await
            {
                metrics::record_error("delivery");
                send_event(sender, &ServerEvent::error(codes::PERSISTENCE, e.to_string()))
                    .await?;
            }
        }

        ClientCommand::MarkRead {
            conversation_id,
            guid,
        } => {
            if let Err(e) = state
                .hub
                .mark_read(connection_id, conversation_id, &guid)
                .await
            {
                metrics::record_error("delivery");
                send_event(sender, &ServerEvent::error(codes::PERSISTENCE, e.to_string()))
                    .await?;
            }
        }

        ClientCommand::Matchmake { filters } => {
            debug!(connection = %connection_id, filtered = filters.is_some(), "Matchmake request");

            match state
                .hub
                .find_random_chat(connection_id, filters.as_ref())
                .await
            {
                Ok(conversation_id) => {
                    metrics::record_match("matched");
                    metrics::set_active_groups(state.hub.stats().groups);
                    send_event(sender, &ServerEvent::MatchFound { conversation_id }).await?;
                }
                Err(e) => {
                    metrics::record_match(match_outcome(&e));
                    send_event(
                        sender,
                        &ServerEvent::error(match_error_code(&e), e.to_string()),
                    )
                    .await?;
                }
            }
        }

        ClientCommand::Ping { timestamp } => {
            send_event(sender, &ServerEvent::Pong { timestamp }).await?;
        }
    }

    Ok(())
}

/// Metrics label for a command.
fn command_kind(command: &ClientCommand) -> &'static str {
    match command {
        ClientCommand::Connect { .. } => "connect",
        ClientCommand::Join { .. } => "join",
        ClientCommand::Leave { .. } => "leave",
        ClientCommand::Send { .. } => "send",
        ClientCommand::MarkReceived { .. } => "mark_received",
        ClientCommand::MarkRead { .. } => "mark_read",
        ClientCommand::Matchmake { .. } => "matchmake",
        ClientCommand::Ping { .. } => "ping",
    }
}

/// Wire error code for a matchmaking failure.
fn match_error_code(error: &MatchError) -> u16 {
    match error {
        MatchError::Unauthenticated => codes::UNAUTHENTICATED,
        MatchError::NoCandidatesAvailable => codes::NO_CANDIDATES,
        MatchError::PartnerUnavailable => codes::PARTNER_UNAVAILABLE,
        MatchError::ProfileNotFound(_) => codes::PROFILE_NOT_FOUND,
        MatchError::Group(_) => codes::GROUP_LIMIT,
        MatchError::Store(_) => codes::PERSISTENCE,
    }
}

/// Metrics label for a matchmaking failure.
fn match_outcome(error: &MatchError) -> &'static str {
    match error {
        MatchError::Unauthenticated => "unauthenticated",
        MatchError::NoCandidatesAvailable => "no_candidates",
        MatchError::PartnerUnavailable => "partner_unavailable",
        MatchError::ProfileNotFound(_) => "profile_not_found",
        MatchError::Group(_) | MatchError::Store(_) => "error",
    }
}

/// Send an event to the WebSocket.
async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<()> {
    let data = codec::encode(event)?;
    metrics::record_event();
    sender.send(Message::Binary(data.to_vec())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_error_codes_are_distinct() {
        let errors = [
            MatchError::Unauthenticated,
            MatchError::NoCandidatesAvailable,
            MatchError::PartnerUnavailable,
            MatchError::ProfileNotFound("u1".to_string()),
        ];

        let mut codes: Vec<u16> = errors.iter().map(match_error_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_command_kind_labels() {
        assert_eq!(
            command_kind(&ClientCommand::Matchmake { filters: None }),
            "matchmake"
        );
        assert_eq!(
            command_kind(&ClientCommand::Join { conversation_id: 1 }),
            "join"
        );
    }
}
