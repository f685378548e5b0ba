//! Shared vocabulary for lobbygate.
//!
//! This crate defines the types every other layer speaks:
//!
//! - **Identity** ([`RoomId`], [`RoomCode`], [`SessionToken`],
//!   [`PlatformUserId`], [`ExternalPlayerId`], [`ApiKeyId`])
//! - **Policy** ([`Permission`], [`RoomPhase`], [`PlayerRole`])
//! - **Wire bodies** for the gateway endpoints and the [`LobbyDelta`]
//!   messages fanned out to lobby clients
//! - **Errors** ([`ProtocolError`], [`LockTimeout`]) and the
//!   [`lock_within`] helper used by every store
//!
//! # Architecture
//!
//! ```text
//! lobbygate (HTTP) → room (sync) → session / gateway → protocol (this crate)
//! ```

mod error;
mod lock;
mod types;

pub use error::{LockTimeout, ProtocolError};
pub use lock::lock_within;
pub use types::{
    ApiKeyId, EventAck, EventKind, EventRequest, ExternalPlayerId, JoinRequest, JoinResponse,
    LobbyDelta, Metadata, Permission, PlatformUserId, PlayerPresence, PlayerRole,
    PlayerStatusRequest, PlayerStatusResponse, PushStateRequest, PushStateResponse, RoomCode,
    RoomId, RoomPhase, SessionInfo, SessionToken, StateSnapshot,
};
