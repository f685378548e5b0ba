//! Unified error type for the gateway and its HTTP mapping.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use lobbygate_gateway::AuthError;
use lobbygate_protocol::{LockTimeout, ProtocolError, RoomId, RoomPhase};
use lobbygate_room::{RoomError, SyncError};
use lobbygate_session::SessionError;
use serde_json::json;

use crate::ConfigError;

/// Top-level error that wraps all crate-specific errors.
///
/// [`SyncError`] is flattened on conversion so that, for example, a
/// session error raised inside a state push maps to the same response as
/// one raised by the validate endpoint.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("stale write: current version is {current}")]
    StaleWrite { room: RoomId, current: u64 },

    #[error("room {room} is {phase}")]
    InvalidRoomState { room: RoomId, phase: RoomPhase },

    #[error("event {key} for room {room} is still being recorded")]
    EventInFlight { room: RoomId, key: String },

    #[error("gateway store unavailable: {0}")]
    Unavailable(#[from] LockTimeout),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SyncError> for GatewayError {
    fn from(value: SyncError) -> Self {
        match value {
            SyncError::Session(e) => Self::Session(e),
            SyncError::Auth(e) => Self::Auth(e),
            SyncError::Protocol(e) => Self::Protocol(e),
            SyncError::Room(e) => Self::Room(e),
            SyncError::StaleWrite { room, current } => Self::StaleWrite { room, current },
            SyncError::InvalidRoomState { room, phase } => Self::InvalidRoomState { room, phase },
            SyncError::EventInFlight { room, key } => Self::EventInFlight { room, key },
            SyncError::Unavailable(e) => Self::Unavailable(e),
        }
    }
}

impl GatewayError {
    /// HTTP status and the machine-readable `error` field.
    pub fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Session(e) => classify_session(e),
            Self::Auth(e) => match e {
                AuthError::InvalidApiKey => (StatusCode::UNAUTHORIZED, "invalid_api_key"),
                AuthError::PermissionDenied(_) => (StatusCode::FORBIDDEN, "permission_denied"),
                AuthError::RateLimitExceeded { .. } => {
                    (StatusCode::TOO_MANY_REQUESTS, "rate_limit_exceeded")
                }
                AuthError::DuplicateKey => (StatusCode::CONFLICT, "duplicate_key"),
                AuthError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            },
            Self::Room(e) => match e {
                RoomError::NotFound(_) => (StatusCode::NOT_FOUND, "room_not_found"),
                RoomError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_room_state"),
                RoomError::NoPlayers => (StatusCode::BAD_REQUEST, "invalid_request"),
                RoomError::Session(e) => classify_session(e),
                RoomError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            },
            Self::Protocol(e) => match e {
                ProtocolError::InvalidMessage(_) => (StatusCode::BAD_REQUEST, "invalid_request"),
                ProtocolError::PayloadTooLarge { .. } => {
                    (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large")
                }
            },
            Self::StaleWrite { .. } => (StatusCode::CONFLICT, "stale_write"),
            Self::InvalidRoomState { .. } => (StatusCode::CONFLICT, "invalid_room_state"),
            Self::EventInFlight { .. } => (StatusCode::CONFLICT, "event_in_progress"),
            Self::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            Self::Config(_) | Self::Io(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

fn classify_session(e: &SessionError) -> (StatusCode, &'static str) {
    match e {
        SessionError::TokenNotFound => (StatusCode::NOT_FOUND, "token_not_found"),
        SessionError::TokenExpired => (StatusCode::GONE, "token_expired"),
        SessionError::InvalidRoomState { .. } => (StatusCode::CONFLICT, "invalid_room_state"),
        SessionError::IdentityMismatch => (StatusCode::FORBIDDEN, "identity_mismatch"),
        SessionError::PlayerNotFound => (StatusCode::NOT_FOUND, "player_not_found"),
        SessionError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, kind) = self.classify();

        let message = if status.is_server_error() {
            tracing::error!(error = %self, kind, "gateway request failed");
            "internal error".to_string()
        } else {
            tracing::debug!(error = %self, kind, "gateway request rejected");
            self.to_string()
        };

        let mut body = json!({ "error": kind, "message": message });
        if let Self::StaleWrite { current, .. } = &self {
            body["currentVersion"] = json!(current);
        }

        let mut response = (status, Json(body)).into_response();
        if let Self::Auth(AuthError::RateLimitExceeded { retry_after }) = &self {
            // Round up so a client never retries before the window closes.
            let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
            if let Ok(value) = HeaderValue::from_str(&secs.max(1).to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
