//! WebSocket handler — transport adapter for one connection.
//!
//! DESIGN
//! ======
//! On upgrade, generates a connection id, sends `welcome`, and enters a
//! `select!` loop:
//! - Incoming client text → lock registry → `Session::handle_text` → replies
//! - Messages queued by room peers → forward to client
//!
//! All protocol logic lives in `services::session`; this module only moves
//! bytes. After each inbound frame the connection's own queue is drained under
//! the same registry guard and written ahead of the replies: a `canvas-state`
//! snapshot never trails old-room strokes, and an `operation-failed` never
//! overtakes the `operation-undo` that came before it.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `welcome` with `connectionId`
//! 2. Client text frames → session dispatch under the registry write lock
//! 3. Close / socket error / send failure → `Session::close` → `user-left`

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::message::{Notice, ProtocolError, ServerMessage};
use crate::services::session::Session;
use crate::state::{AppState, now_ms};

const WELCOME: &str = "Connected to collaborative canvas server";

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();

    // Per-connection queue for messages fanned out by room peers.
    let (client_tx, mut client_rx) = mpsc::channel::<ServerMessage>(state.config.client_channel_capacity);

    let welcome = Notice::Welcome { message: WELCOME.into(), connection_id, timestamp: now_ms() }.into();
    if send_message(&mut socket, &welcome).await.is_err() {
        return;
    }
    info!(%connection_id, "ws: client connected");

    let mut session = Session::new(connection_id, client_tx, state.config.default_room.clone());

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                let outbound = match msg {
                    Message::Text(text) => dispatch_text(&state, &mut session, &mut client_rx, text.as_str()).await,
                    Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                        Ok(text) => dispatch_text(&state, &mut session, &mut client_rx, text).await,
                        Err(e) => {
                            warn!(%connection_id, error = %e, "ws: binary frame is not utf-8");
                            vec![ServerMessage::error(&ProtocolError::Malformed(e.to_string()))]
                        }
                    },
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) => continue,
                };
                if send_all(&mut socket, &outbound).await.is_err() {
                    break;
                }
            }
            Some(message) = client_rx.recv() => {
                if send_message(&mut socket, &message).await.is_err() {
                    break;
                }
            }
        }
    }

    {
        let mut rooms = state.rooms.write().await;
        session.close(&mut rooms);
    }
    info!(%connection_id, "ws: client disconnected");
}

/// Run one inbound text frame through the session under the registry lock.
///
/// Everything already queued for this connection is taken out before the
/// guard is released and sent ahead of the replies, so the client sees its
/// own broadcasts and replies in the order the registry produced them.
async fn dispatch_text(
    state: &AppState,
    session: &mut Session,
    client_rx: &mut mpsc::Receiver<ServerMessage>,
    text: &str,
) -> Vec<ServerMessage> {
    let mut rooms = state.rooms.write().await;
    let replies = session.handle_text(&mut rooms, text);

    let mut outbound = Vec::with_capacity(replies.len());
    while let Ok(queued) = client_rx.try_recv() {
        outbound.push(queued);
    }
    outbound.extend(replies);
    outbound
}

// =============================================================================
// HELPERS
// =============================================================================

async fn send_all(socket: &mut WebSocket, messages: &[ServerMessage]) -> Result<(), ()> {
    for message in messages {
        send_message(socket, message).await?;
    }
    Ok(())
}

async fn send_message(socket: &mut WebSocket, message: &ServerMessage) -> Result<(), ()> {
    let json = match serde_json::to_string(message) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, kind = message.kind(), "ws: failed to serialize message");
            return Err(());
        }
    };
    match message {
        ServerMessage::Notice(Notice::Error { message: text, code }) => {
            warn!(%code, message = %text, "ws: send error");
        }
        _ if !message.is_ephemeral() => debug!(kind = message.kind(), "ws: send"),
        _ => {}
    }
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|e| debug!(error = %e, "ws: socket send failed"))
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
