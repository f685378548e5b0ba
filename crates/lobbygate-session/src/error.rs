//! Error types for the session layer.

use lobbygate_protocol::{LockTimeout, RoomId, RoomPhase};

/// Errors that can occur while issuing, validating, or binding sessions.
///
/// `TokenNotFound` ("never valid") and `TokenExpired` ("was valid, now
/// stale") are kept apart so callers can tell the two cases apart.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No live session exists for the presented token. Also returned for
    /// revoked and purged tokens.
    #[error("session token not found")]
    TokenNotFound,

    /// The token exists but its `expires_at` has passed.
    #[error("session token expired")]
    TokenExpired,

    /// The room can't take a new session in its current phase
    /// (for example, it was already terminated).
    #[error("room {room} is {phase}, not accepting sessions")]
    InvalidRoomState { room: RoomId, phase: RoomPhase },

    /// The session is already bound to a different external player id, or
    /// the external id is already bound to another session in the room.
    #[error("external player identity does not match this session")]
    IdentityMismatch,

    /// The external player id cannot be reconciled with the session's
    /// platform identity (no binding, a different id, or a spectator
    /// session with no player at all).
    #[error("player not found for this session")]
    PlayerNotFound,

    /// The token store could not be reached in bounded time.
    #[error("session store unavailable: {0}")]
    Unavailable(#[from] LockTimeout),
}
