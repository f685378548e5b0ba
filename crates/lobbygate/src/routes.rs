//! HTTP routes for external game servers.
//!
//! Every `/v1` handler does the same three things in order:
//!   1. Authenticate the presented API key for the endpoint's permission
//!      and count the call against its rate limit
//!   2. Unwrap the request body, if any
//!   3. Hand off to the [`RoomStateSynchronizer`](lobbygate_room::RoomStateSynchronizer)
//!
//! Authentication runs before anything touches the session token, so an
//! unauthenticated caller cannot learn which tokens exist.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use lobbygate_protocol::{
    EventAck, EventRequest, ExternalPlayerId, JoinRequest, JoinResponse, Permission,
    PlayerStatusRequest, PlayerStatusResponse, ProtocolError, PushStateRequest,
    PushStateResponse, SessionInfo, SessionToken, StateSnapshot,
};
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::api_key::PresentedKey;
use crate::{GatewayError, Lobby, ws};

/// Builds the gateway router over a shared [`Lobby`].
pub fn router(lobby: Arc<Lobby>) -> Router {
    let timeout = lobby.config().request_timeout;

    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/rooms/:token/validate", get(validate))
        .route("/v1/rooms/:token/join", post(join))
        .route("/v1/rooms/:token/state", get(pull_state).post(push_state))
        .route(
            "/v1/rooms/:token/players/:player_id/status",
            post(player_status),
        )
        .route("/v1/rooms/:token/events", post(emit_event))
        .route("/lobby/rooms/:room_id/subscribe", get(ws::subscribe))
        .layer(TimeoutLayer::new(timeout))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(lobby)
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, GatewayError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ProtocolError::InvalidMessage(rejection.body_text()).into())
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn validate(
    State(lobby): State<Arc<Lobby>>,
    PresentedKey(key): PresentedKey,
    Path(token): Path<String>,
) -> Result<Json<SessionInfo>, GatewayError> {
    let caller = lobby
        .auth()
        .check(key.as_ref(), Permission::ValidateSession, "session.validate")
        .await?;
    let info = lobby
        .sync()
        .validate_session(&caller, &SessionToken::new(token))
        .await?;
    Ok(Json(info))
}

async fn join(
    State(lobby): State<Arc<Lobby>>,
    PresentedKey(key): PresentedKey,
    Path(token): Path<String>,
    payload: Result<Json<JoinRequest>, JsonRejection>,
) -> Result<Json<JoinResponse>, GatewayError> {
    let caller = lobby
        .auth()
        .check(key.as_ref(), Permission::ValidateSession, "player.join")
        .await?;
    let request = body(payload)?;
    let joined = lobby
        .sync()
        .join(&caller, &SessionToken::new(token), request)
        .await?;
    Ok(Json(joined))
}

async fn push_state(
    State(lobby): State<Arc<Lobby>>,
    PresentedKey(key): PresentedKey,
    Path(token): Path<String>,
    payload: Result<Json<PushStateRequest>, JsonRejection>,
) -> Result<Json<PushStateResponse>, GatewayError> {
    let caller = lobby
        .auth()
        .check(key.as_ref(), Permission::WriteState, "state.push")
        .await?;
    let request = body(payload)?;
    let pushed = lobby
        .sync()
        .push(&caller, &SessionToken::new(token), request)
        .await?;
    Ok(Json(pushed))
}

async fn pull_state(
    State(lobby): State<Arc<Lobby>>,
    PresentedKey(key): PresentedKey,
    Path(token): Path<String>,
) -> Result<Json<StateSnapshot>, GatewayError> {
    let caller = lobby
        .auth()
        .check(key.as_ref(), Permission::ReadState, "state.pull")
        .await?;
    let snapshot = lobby
        .sync()
        .pull(&caller, &SessionToken::new(token))
        .await?;
    Ok(Json(snapshot))
}

async fn player_status(
    State(lobby): State<Arc<Lobby>>,
    PresentedKey(key): PresentedKey,
    Path((token, player_id)): Path<(String, String)>,
    payload: Result<Json<PlayerStatusRequest>, JsonRejection>,
) -> Result<Json<PlayerStatusResponse>, GatewayError> {
    let caller = lobby
        .auth()
        .check(key.as_ref(), Permission::UpdatePlayerStatus, "player.status")
        .await?;
    let request = body(payload)?;
    let updated = lobby
        .sync()
        .update_player_status(
            &caller,
            &SessionToken::new(token),
            &ExternalPlayerId::new(player_id),
            request,
        )
        .await?;
    Ok(Json(updated))
}

async fn emit_event(
    State(lobby): State<Arc<Lobby>>,
    PresentedKey(key): PresentedKey,
    Path(token): Path<String>,
    payload: Result<Json<EventRequest>, JsonRejection>,
) -> Result<Json<EventAck>, GatewayError> {
    let caller = lobby
        .auth()
        .check(key.as_ref(), Permission::EmitEvents, "event.emit")
        .await?;
    let request = body(payload)?;
    let ack = lobby
        .sync()
        .event(&caller, &SessionToken::new(token), request)
        .await?;
    Ok(Json(ack))
}
