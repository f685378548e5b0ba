//! Session types: what the server remembers about an issued token.
//!
//! A session ties one opaque [`SessionToken`] to one room and, for players,
//! one platform user. It records:
//! - WHERE the token leads (room id and the internal room code)
//! - WHO it was issued to (platform user id, absent for spectators)
//! - WHEN it stops working (`expires_at`) and when it was last used
//! - WHICH external player id the game reported on first contact

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use lobbygate_protocol::{
    ExternalPlayerId, Metadata, PlatformUserId, RoomCode, RoomId, RoomPhase, SessionToken,
};
use tokio::time::Instant;

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Configuration for session behavior.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Lifetime of a token when the issuer doesn't pass one.
    ///
    /// Default: 3 hours.
    pub default_ttl: Duration,

    /// How long after its last successful validation an expired session is
    /// kept around by the sweeper. A request that validated a token just
    /// before it expired can finish using it.
    ///
    /// Default: 30 seconds.
    pub touch_grace: Duration,

    /// Deadline for acquiring the token store lock.
    ///
    /// Default: 2 seconds.
    pub lock_timeout: Duration,

    /// How many event idempotency keys one session remembers. Past this,
    /// the oldest recorded key is forgotten.
    ///
    /// Default: 1024.
    pub max_event_keys: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(3 * 60 * 60),
            touch_grace: Duration::from_secs(30),
            lock_timeout: Duration::from_secs(2),
            max_event_keys: 1024,
        }
    }
}

// ---------------------------------------------------------------------------
// Issuing
// ---------------------------------------------------------------------------

/// The lobby's view of a room at the moment a session is requested.
///
/// Produced by the room directory; the broker only issues a token when
/// `phase` accepts sessions.
#[derive(Debug, Clone)]
pub struct RoomTicket {
    pub room_id: RoomId,
    pub room_code: RoomCode,
    pub phase: RoomPhase,
    pub expected_players: u32,
}

/// Everything the lobby supplies when launching someone into a game.
#[derive(Debug, Clone, Default)]
pub struct IssueRequest {
    /// The launching player. `None` for spectators and unbound hosts.
    pub player: Option<PlatformUserId>,
    /// Game type tag (for example `"trivia"`).
    pub game_type: String,
    /// Whether the room runs in streamer mode.
    pub streamer_mode: bool,
    /// Free-form launch metadata, returned verbatim on validate.
    pub metadata: Metadata,
    /// Token lifetime. `None` uses [`SessionConfig::default_ttl`].
    pub ttl: Option<Duration>,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// The fixed association between a session and the external game's own
/// player identifier, learned on first contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerBinding {
    pub platform_user_id: PlatformUserId,
    pub external_player_id: ExternalPlayerId,
    pub bound_at: Instant,
}

/// A stored session. Lives in the [`TokenStore`](crate::TokenStore).
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub token: SessionToken,
    pub room_id: RoomId,
    /// Internal only. Reachable through a server-side token lookup and
    /// never serialized.
    pub room_code: RoomCode,
    pub platform_user_id: Option<PlatformUserId>,
    pub game_type: String,
    pub streamer_mode: bool,
    pub metadata: Metadata,
    pub expected_players: u32,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub last_accessed_at: Instant,
    pub binding: Option<PlayerBinding>,
    /// Idempotency keys of events claimed through this session.
    pub event_keys: EventKeys,
}

impl SessionRecord {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Snapshot handed to callers of `validate`.
    pub fn context(&self) -> SessionContext {
        SessionContext {
            token: self.token.clone(),
            room_id: self.room_id,
            room_code: self.room_code.clone(),
            platform_user_id: self.platform_user_id.clone(),
            game_type: self.game_type.clone(),
            streamer_mode: self.streamer_mode,
            metadata: self.metadata.clone(),
            expected_players: self.expected_players,
            expires_at: self.expires_at,
            external_player_id: self
                .binding
                .as_ref()
                .map(|b| b.external_player_id.clone()),
        }
    }
}

// ---------------------------------------------------------------------------
// Event idempotency keys
// ---------------------------------------------------------------------------

/// Outcome of claiming an event idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClaim {
    /// First sighting. The caller records the event and then calls
    /// `complete_event_key` or `release_event_key`.
    Claimed,
    /// Another request holds the key and has not finished recording yet.
    InFlight,
    /// The event was already recorded at this sequence.
    Recorded(u64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyState {
    Pending,
    Recorded(u64),
}

/// Per-session idempotency keys in claim order.
///
/// Bounded: once `cap` keys are held, claiming a new one forgets the
/// oldest recorded key. Pending keys are never evicted.
#[derive(Debug, Clone, Default)]
pub struct EventKeys {
    states: HashMap<String, KeyState>,
    order: VecDeque<String>,
}

impl EventKeys {
    pub fn claim(&mut self, key: &str, cap: usize) -> EventClaim {
        match self.states.get(key) {
            Some(KeyState::Pending) => return EventClaim::InFlight,
            Some(KeyState::Recorded(sequence)) => return EventClaim::Recorded(*sequence),
            None => {}
        }

        while self.order.len() >= cap.max(1) && self.evict_oldest_recorded() {}
        self.states.insert(key.to_owned(), KeyState::Pending);
        self.order.push_back(key.to_owned());
        EventClaim::Claimed
    }

    /// Marks a pending key as recorded at `sequence`.
    pub fn complete(&mut self, key: &str, sequence: u64) {
        if let Some(state) = self.states.get_mut(key) {
            *state = KeyState::Recorded(sequence);
        }
    }

    /// Forgets a pending key so a retry can claim it again.
    pub fn release(&mut self, key: &str) {
        if self.states.get(key) == Some(&KeyState::Pending) {
            self.states.remove(key);
            self.order.retain(|k| k != key);
        }
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    fn evict_oldest_recorded(&mut self) -> bool {
        let Some(index) = self
            .order
            .iter()
            .position(|k| matches!(self.states.get(k), Some(KeyState::Recorded(_))))
        else {
            return false;
        };
        if let Some(key) = self.order.remove(index) {
            self.states.remove(&key);
        }
        true
    }
}

/// The resolved room/player context of a valid token.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub token: SessionToken,
    pub room_id: RoomId,
    pub room_code: RoomCode,
    pub platform_user_id: Option<PlatformUserId>,
    pub game_type: String,
    pub streamer_mode: bool,
    pub metadata: Metadata,
    pub expected_players: u32,
    pub expires_at: Instant,
    pub external_player_id: Option<ExternalPlayerId>,
}

impl SessionContext {
    /// Time left before the token expires, zero if already past.
    pub fn expires_in(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

/// Point-in-time counts for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionStats {
    /// Sessions in the store, expired-but-unswept included.
    pub stored: usize,
    /// Sessions with an external player binding.
    pub bound: usize,
}
