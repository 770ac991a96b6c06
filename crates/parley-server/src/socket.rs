//! WebSocket connection lifecycle.
//!
//! The handshake is authenticated before the upgrade completes, so an
//! unauthenticated client never gets a socket.  Each connection runs two
//! tasks: this reader loop and a writer task draining the connection's
//! event channel into the sink.  The channel sender registered with the
//! ConnectionRegistry is the connection's only address; dropping it ends
//! the writer.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_shared::events::{ClientEvent, ServerEvent};
use parley_shared::types::{ChatId, UserId};
use parley_store::models::User;

use crate::auth::authenticate;
use crate::error::ApiError;
use crate::fanout::FanoutRouter;
use crate::presence::PresenceTracker;
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::state::AppState;

/// `GET /ws` upgrade handler.
pub async fn ws_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let user = authenticate(&state, &headers).await?;
    Ok(ws.on_upgrade(move |socket| connection_loop(state, user, socket)))
}

async fn connection_loop(state: AppState, user: User, socket: WebSocket) {
    let connection_id = ConnectionId::new();
    let user_id = user.id;

    // Everyone sharing a chat with this user right now.  Captured once so
    // the disconnect broadcast goes to the same audience that could have
    // seen this user online.
    let peers = {
        let uid = user_id;
        match state.with_db(move |db| db.co_members_for_user(uid)).await {
            Ok(peers) => peers,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Failed to load peer set");
                Vec::new()
            }
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    state.registry.register(user_id, connection_id, tx.clone()).await;
    info!(user_id = %user_id, connection_id = %connection_id, "Socket connected");

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let frame = match event.to_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "Failed to encode event frame");
                    continue;
                }
            };
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let event = match ClientEvent::from_frame(&text) {
                    Ok(event) => event,
                    Err(e) => {
                        debug!(user_id = %user_id, error = %e, "Unparseable client frame");
                        continue;
                    }
                };
                handle_client_event(&state, &user, &tx, event).await;
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {} // ping/pong handled by the transport, binary ignored
            Err(e) => {
                debug!(user_id = %user_id, error = %e, "Socket read error");
                break;
            }
        }
    }

    teardown(
        &state.registry,
        &state.presence,
        &state.fanout,
        user_id,
        connection_id,
        &peers,
    )
    .await;

    drop(tx);
    let _ = writer.await;
}

async fn handle_client_event(
    state: &AppState,
    user: &User,
    tx: &mpsc::UnboundedSender<ServerEvent>,
    event: ClientEvent,
) {
    match event {
        ClientEvent::NewMessage { chat_id, content } => {
            if let Err(e) = state.ingest.send_message(user, chat_id, content).await {
                // Persistence failures already ack the sender inside the
                // pipeline; everything else is reported here.
                if !matches!(e, ApiError::Persistence(_)) {
                    let _ = tx.send(ServerEvent::Alert {
                        message: e.to_string(),
                        chat_id: Some(chat_id),
                    });
                }
            }
        }
        ClientEvent::StartTyping { chat_id } => {
            if let Some(members) = members_if_allowed(state, user.id, chat_id, tx).await {
                let targets: Vec<UserId> =
                    members.into_iter().filter(|m| *m != user.id).collect();
                state
                    .fanout
                    .dispatch(&targets, ServerEvent::StartTyping { chat_id })
                    .await;
            }
        }
        ClientEvent::StopTyping { chat_id } => {
            if let Some(members) = members_if_allowed(state, user.id, chat_id, tx).await {
                let targets: Vec<UserId> =
                    members.into_iter().filter(|m| *m != user.id).collect();
                state
                    .fanout
                    .dispatch(&targets, ServerEvent::StopTyping { chat_id })
                    .await;
            }
        }
        ClientEvent::ChatJoined { chat_id } => {
            if let Some(members) = members_if_allowed(state, user.id, chat_id, tx).await {
                state.presence.mark_online(user.id).await;
                let snapshot = state.presence.snapshot().await;
                state
                    .fanout
                    .dispatch(&members, ServerEvent::OnlineUsers(snapshot))
                    .await;
            }
        }
        ClientEvent::ChatLeaved { chat_id } => {
            if let Some(members) = members_if_allowed(state, user.id, chat_id, tx).await {
                state.presence.mark_offline(user.id).await;
                let snapshot = state.presence.snapshot().await;
                state
                    .fanout
                    .dispatch(&members, ServerEvent::OnlineUsers(snapshot))
                    .await;
            }
        }
    }
}

/// Load a chat's member list if the acting user belongs to it; otherwise
/// report on the user's own connection and yield nothing.
async fn members_if_allowed(
    state: &AppState,
    user_id: UserId,
    chat_id: ChatId,
    tx: &mpsc::UnboundedSender<ServerEvent>,
) -> Option<Vec<UserId>> {
    let members = match state.with_db(move |db| db.members_of_chat(chat_id)).await {
        Ok(members) => members,
        Err(_) => {
            let _ = tx.send(ServerEvent::Alert {
                message: "Chat not found".to_string(),
                chat_id: Some(chat_id),
            });
            return None;
        }
    };
    if !members.contains(&user_id) {
        let _ = tx.send(ServerEvent::Alert {
            message: "You are not a member of this chat".to_string(),
            chat_id: Some(chat_id),
        });
        return None;
    }
    Some(members)
}

/// Tear one connection down.  Safe to call more than once for the same
/// connection; only the call that actually removes the registration marks
/// the user offline and broadcasts the presence change.
async fn teardown(
    registry: &ConnectionRegistry,
    presence: &PresenceTracker,
    fanout: &FanoutRouter,
    user_id: UserId,
    connection_id: ConnectionId,
    peers: &[UserId],
) {
    if !registry.unregister(user_id, connection_id).await {
        return;
    }

    presence.mark_offline(user_id).await;
    let snapshot = presence.snapshot().await;

    let mut targets = peers.to_vec();
    targets.push(user_id);
    fanout
        .dispatch(&targets, ServerEvent::OnlineUsers(snapshot))
        .await;

    info!(user_id = %user_id, connection_id = %connection_id, "Socket disconnected");
}
