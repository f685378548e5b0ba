//! Lobby subscription WebSocket.
//!
//! Each upgraded connection gets its own task that forwards the room's
//! [`LobbyDelta`]s as JSON text frames until one of these happens:
//!   1. The room's channel closes (room terminated) → send Close, stop
//!   2. The client closes or the socket errors → stop
//!
//! A client that falls behind the channel capacity skips the missed
//! deltas and keeps receiving from the oldest one still buffered.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use lobbygate_protocol::{LobbyDelta, RoomId};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::{GatewayError, Lobby};

/// `GET /lobby/rooms/:room_id/subscribe`
///
/// The subscription is taken before the upgrade so an unknown room is a
/// plain 404 instead of a socket that closes immediately.
pub(crate) async fn subscribe(
    State(lobby): State<Arc<Lobby>>,
    Path(room_id): Path<u64>,
    ws: WebSocketUpgrade,
) -> Result<Response, GatewayError> {
    let room = RoomId(room_id);
    let rx = lobby.subscribe(room).await?;
    tracing::debug!(room_id = %room, "lobby client subscribing");
    Ok(ws.on_upgrade(move |socket| forward_deltas(socket, rx, room)))
}

async fn forward_deltas(
    mut socket: WebSocket,
    mut rx: broadcast::Receiver<Arc<LobbyDelta>>,
    room: RoomId,
) {
    loop {
        tokio::select! {
            delta = rx.recv() => match delta {
                Ok(delta) => {
                    let text = match serde_json::to_string(&*delta) {
                        Ok(text) => text,
                        Err(e) => {
                            tracing::warn!(room_id = %room, error = %e, "failed to encode delta");
                            continue;
                        }
                    };
                    if socket.send(Message::Text(text)).await.is_err() {
                        tracing::debug!(room_id = %room, "lobby client went away");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(room_id = %room, skipped, "lobby client lagging, deltas skipped");
                }
                Err(RecvError::Closed) => {
                    let _ = socket.send(Message::Close(None)).await;
                    tracing::debug!(room_id = %room, "room closed, ending subscription");
                    break;
                }
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(room_id = %room, error = %e, "lobby socket error");
                    break;
                }
                // Subscriptions are one-way; pings are answered by axum.
                Some(Ok(_)) => {}
            },
        }
    }
}
