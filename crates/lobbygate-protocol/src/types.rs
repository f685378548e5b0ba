//! Core protocol types shared by every lobbygate layer.
//!
//! This module defines the identifiers that flow between the lobby, the
//! gateway, and external game servers, plus the JSON bodies of every
//! gateway endpoint and the deltas fanned out to lobby clients.
//!
//! Anything that derives `Serialize` here may end up in a response body or a
//! launch URL. [`RoomCode`] deliberately does not.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Internal identifier for a lobby room.
///
/// Newtype over `u64` so a `RoomId` can't be passed where an [`ApiKeyId`]
/// is expected. Serialized as the bare number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

/// The short human-shareable code players type to join a lobby room.
///
/// Room codes are short and guessable (six characters), so they must never
/// reach an external game. This type has no `Serialize` impl: the compiler
/// refuses to put it in a response body or a launch URL.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RoomCode(String);

impl RoomCode {
    /// Wraps a code, normalising it to uppercase.
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoomCode({})", self.0)
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The platform's own identifier for a signed-in user.
///
/// Established by the lobby when a token is issued and handed to the
/// external game as `playerId`. The gateway never accepts one from an
/// external caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlatformUserId(pub String);

impl PlatformUserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for PlatformUserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A player identifier invented by the external game.
///
/// Untrusted. It only means something once it has been bound to a
/// session (see the identity resolver in `lobbygate-session`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExternalPlayerId(pub String);

impl ExternalPlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ExternalPlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a provisioned API key. Safe to log; the secret is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApiKeyId(pub u64);

impl fmt::Display for ApiKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "K-{}", self.0)
    }
}

/// An opaque session token handed to an external game in place of a room
/// code.
///
/// The token is a bearer credential, so `Debug` and `Display` only show an
/// eight-character prefix. Use [`SessionToken::as_str`] when the full value
/// is genuinely needed (building a launch URL, looking it up).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn prefix(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(8)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({}…)", self.prefix())
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}…", self.prefix())
    }
}

// ---------------------------------------------------------------------------
// Permissions
// ---------------------------------------------------------------------------

/// An operation an API key may be allowed to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Validate a session token and join players.
    ValidateSession,
    /// Pull authoritative room state.
    ReadState,
    /// Push room state.
    WriteState,
    /// Report a player's status.
    UpdatePlayerStatus,
    /// Emit discrete game events.
    EmitEvents,
}

impl Permission {
    /// Every permission, for keys with full gateway access.
    pub const ALL: [Permission; 5] = [
        Permission::ValidateSession,
        Permission::ReadState,
        Permission::WriteState,
        Permission::UpdatePlayerStatus,
        Permission::EmitEvents,
    ];

    /// A scope that can look but not touch.
    pub const READ_ONLY: [Permission; 2] = [Permission::ValidateSession, Permission::ReadState];
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ValidateSession => "validate_session",
            Self::ReadState => "read_state",
            Self::WriteState => "write_state",
            Self::UpdatePlayerStatus => "update_player_status",
            Self::EmitEvents => "emit_events",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Room lifecycle
// ---------------------------------------------------------------------------

/// The lifecycle phase of a lobby room.
///
/// Transitions are strictly ordered, no skipping:
///
/// ```text
/// Waiting → InGame → Finished → Terminated
/// ```
///
/// - **Waiting**: players gather in the lobby.
/// - **InGame**: players were handed off to the external game. Only in
///   this phase can sessions be issued and state be pushed.
/// - **Finished**: the external game reported the match as complete.
///   State can still be pulled.
/// - **Terminated**: the room is gone. All sessions were revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomPhase {
    Waiting,
    InGame,
    Finished,
    Terminated,
}

impl RoomPhase {
    /// Returns the phase that follows this one, or `None` at the end.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Waiting => Some(Self::InGame),
            Self::InGame => Some(Self::Finished),
            Self::Finished => Some(Self::Terminated),
            Self::Terminated => None,
        }
    }

    /// Returns `true` if moving to `target` is a valid single step.
    pub fn can_transition_to(self, target: Self) -> bool {
        self.next() == Some(target)
    }

    /// Whether new session tokens may be issued for the room.
    pub fn accepts_sessions(self) -> bool {
        matches!(self, Self::InGame)
    }

    /// Whether external state pushes and events are accepted.
    pub fn accepts_writes(self) -> bool {
        matches!(self, Self::InGame)
    }

    /// Whether state can still be read.
    pub fn is_readable(self) -> bool {
        matches!(self, Self::InGame | Self::Finished)
    }
}

impl fmt::Display for RoomPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "Waiting"),
            Self::InGame => write!(f, "InGame"),
            Self::Finished => write!(f, "Finished"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

/// What a launched participant is doing in the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlayerRole {
    #[default]
    Player,
    Host,
    Spectator,
}

impl PlayerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Player => "player",
            Self::Host => "host",
            Self::Spectator => "spectator",
        }
    }
}

/// A player's presence as reported by the external game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerPresence {
    Online,
    InGame,
    Away,
    Offline,
}

/// The type of a discrete game event.
///
/// Well-known kinds get their own variant; anything else is carried
/// verbatim as `Custom`. On the wire every kind is a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    PlayerJoined,
    PlayerLeft,
    MatchStarted,
    MatchCompleted,
    Custom(String),
}

impl From<String> for EventKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "player_joined" => Self::PlayerJoined,
            "player_left" => Self::PlayerLeft,
            "match_started" => Self::MatchStarted,
            "match_completed" => Self::MatchCompleted,
            _ => Self::Custom(value),
        }
    }
}

impl From<EventKind> for String {
    fn from(value: EventKind) -> Self {
        match value {
            EventKind::PlayerJoined => "player_joined".into(),
            EventKind::PlayerLeft => "player_left".into(),
            EventKind::MatchStarted => "match_started".into(),
            EventKind::MatchCompleted => "match_completed".into(),
            EventKind::Custom(s) => s,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from(self.clone()))
    }
}

// ---------------------------------------------------------------------------
// Gateway request/response bodies
// ---------------------------------------------------------------------------

/// Free-form launch metadata attached to a session.
pub type Metadata = BTreeMap<String, Value>;

/// `GET /rooms/{token}/validate` response.
///
/// Everything an external game needs to set up a match. No room code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub room_id: RoomId,
    pub game_type: String,
    pub streamer_mode: bool,
    pub phase: RoomPhase,
    pub expected_players: u32,
    pub player_id: Option<PlatformUserId>,
    pub metadata: Metadata,
    pub expires_in_secs: u64,
}

/// `POST /rooms/{token}/join` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub external_player_id: ExternalPlayerId,
    #[serde(default)]
    pub display_name: Option<String>,
}

/// `POST /rooms/{token}/join` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
    pub room_id: RoomId,
    pub platform_user_id: PlatformUserId,
}

/// `POST /rooms/{token}/state` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushStateRequest {
    pub version: u64,
    pub payload: Value,
}

/// `POST /rooms/{token}/state` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushStateResponse {
    pub version: u64,
}

/// `GET /rooms/{token}/state` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub version: u64,
    pub payload: Value,
}

/// `POST /rooms/{token}/players/{externalPlayerId}/status` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerStatusRequest {
    pub status: PlayerPresence,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

/// `POST /rooms/{token}/players/{externalPlayerId}/status` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStatusResponse {
    pub platform_user_id: PlatformUserId,
    pub status: PlayerPresence,
}

/// `POST /rooms/{token}/events` body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRequest {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// `POST /rooms/{token}/events` response.
///
/// `duplicate` is `true` when the idempotency key had already been
/// recorded; the event was not applied a second time and `sequence` is the
/// one assigned on first delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAck {
    pub sequence: u64,
    pub duplicate: bool,
}

// ---------------------------------------------------------------------------
// LobbyDelta: what lobby clients see
// ---------------------------------------------------------------------------

/// A change notification fanned out to lobby clients subscribed to a room.
///
/// Internally tagged, so a state change serializes as
/// `{ "type": "StateChanged", "room_id": 1, "version": 3, "payload": {...} }`.
/// Delivery is at-least-once; consumers must tolerate duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LobbyDelta {
    StateChanged {
        room_id: RoomId,
        version: u64,
        payload: Value,
    },
    PlayerJoined {
        room_id: RoomId,
        platform_user_id: PlatformUserId,
        display_name: Option<String>,
    },
    PlayerStatus {
        room_id: RoomId,
        platform_user_id: PlatformUserId,
        status: PlayerPresence,
        location: Option<String>,
        reason: Option<String>,
    },
    GameEvent {
        room_id: RoomId,
        sequence: u64,
        kind: EventKind,
        data: Value,
    },
    PhaseChanged {
        room_id: RoomId,
        phase: RoomPhase,
    },
}

impl LobbyDelta {
    /// The room this delta belongs to.
    pub fn room_id(&self) -> RoomId {
        match self {
            Self::StateChanged { room_id, .. }
            | Self::PlayerJoined { room_id, .. }
            | Self::PlayerStatus { room_id, .. }
            | Self::GameEvent { room_id, .. }
            | Self::PhaseChanged { room_id, .. } => *room_id,
        }
    }
}
