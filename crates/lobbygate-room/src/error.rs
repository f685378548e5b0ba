//! Error types for the room layer.

use lobbygate_gateway::AuthError;
use lobbygate_protocol::{LockTimeout, ProtocolError, RoomId, RoomPhase};
use lobbygate_session::SessionError;

/// Errors from the lobby-side room directory.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The room does not exist.
    #[error("room {0} not found")]
    NotFound(RoomId),

    /// The requested phase change skips or reverses a step.
    #[error("room {room} cannot move from {from} to {to}")]
    InvalidTransition {
        room: RoomId,
        from: RoomPhase,
        to: RoomPhase,
    },

    /// Expected player count must be at least one.
    #[error("room needs at least one expected player")]
    NoPlayers,

    /// Session revocation failed while terminating.
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("room directory unavailable: {0}")]
    Unavailable(#[from] LockTimeout),
}

/// Errors from gateway-facing state synchronization.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Room(#[from] RoomError),

    /// The pushed version does not exceed the stored one. The caller should
    /// pull, merge, and retry with a higher version.
    #[error("stale write to room {room}: current version is {current}")]
    StaleWrite { room: RoomId, current: u64 },

    /// The room's phase does not allow this operation.
    #[error("room {room} is {phase}")]
    InvalidRoomState { room: RoomId, phase: RoomPhase },

    /// An event with this idempotency key is still being recorded.
    #[error("event {key} for room {room} is still being recorded")]
    EventInFlight { room: RoomId, key: String },

    #[error("room state unavailable: {0}")]
    Unavailable(#[from] LockTimeout),
}
