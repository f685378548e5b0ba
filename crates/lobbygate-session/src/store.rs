//! The token store: the mapping from opaque tokens to session records.
//!
//! # Concurrency note
//!
//! `TokenStore` is NOT thread-safe by itself. It is a set of plain
//! `HashMap`s owned by the [`SessionBroker`](crate::SessionBroker) behind
//! one mutex. Validate, bind, revoke, and sweep all go through that mutex,
//! so a sweep can never remove a session between a caller's check and its
//! update.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use lobbygate_protocol::{ExternalPlayerId, PlatformUserId, RoomId, SessionToken};
use tokio::time::Instant;

use crate::SessionRecord;

/// All live sessions plus the indexes needed to find them by room, by
/// player, and by external player id.
///
/// ```text
/// sessions:   token ──→ record
/// by_room:    room ──→ {token, token, …}
/// by_player:  (room, platform user) ──→ token     (at most one per pair)
/// by_external:(room, external id) ──→ token       (at most one per pair)
/// closed:     {room, room, …}                      (never issued to again)
/// ```
///
/// Every mutation keeps the four maps in sync.
#[derive(Debug, Default)]
pub struct TokenStore {
    sessions: HashMap<SessionToken, SessionRecord>,
    by_room: HashMap<RoomId, HashSet<SessionToken>>,
    by_player: HashMap<(RoomId, PlatformUserId), SessionToken>,
    by_external: HashMap<(RoomId, ExternalPlayerId), SessionToken>,
    closed: HashSet<RoomId>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a new session.
    ///
    /// If the same platform user already holds a token for this room, that
    /// token is removed first and returned: one live token per
    /// (room, player) pair.
    pub fn insert(&mut self, record: SessionRecord) -> Option<SessionRecord> {
        let replaced = record
            .platform_user_id
            .as_ref()
            .and_then(|p| self.by_player.get(&(record.room_id, p.clone())).cloned())
            .and_then(|old| self.remove(&old));

        if let Some(player) = &record.platform_user_id {
            self.by_player
                .insert((record.room_id, player.clone()), record.token.clone());
        }
        self.by_room
            .entry(record.room_id)
            .or_default()
            .insert(record.token.clone());
        self.sessions.insert(record.token.clone(), record);

        replaced
    }

    pub fn contains(&self, token: &SessionToken) -> bool {
        self.sessions.contains_key(token)
    }

    pub fn get(&self, token: &SessionToken) -> Option<&SessionRecord> {
        self.sessions.get(token)
    }

    pub fn get_mut(&mut self, token: &SessionToken) -> Option<&mut SessionRecord> {
        self.sessions.get_mut(token)
    }

    /// Which session, if any, already claimed this external id in the room.
    pub fn external_owner(
        &self,
        room: RoomId,
        external: &ExternalPlayerId,
    ) -> Option<&SessionToken> {
        self.by_external.get(&(room, external.clone()))
    }

    /// Records that `token` claimed `external` in `room`.
    pub fn index_external(&mut self, room: RoomId, external: ExternalPlayerId, token: SessionToken) {
        self.by_external.insert((room, external), token);
    }

    /// Removes one session and all index entries pointing at it.
    pub fn remove(&mut self, token: &SessionToken) -> Option<SessionRecord> {
        let record = self.sessions.remove(token)?;

        if let Some(tokens) = self.by_room.get_mut(&record.room_id) {
            tokens.remove(token);
            if tokens.is_empty() {
                self.by_room.remove(&record.room_id);
            }
        }
        if let Some(player) = &record.platform_user_id {
            let key = (record.room_id, player.clone());
            if self.by_player.get(&key) == Some(token) {
                self.by_player.remove(&key);
            }
        }
        if let Some(binding) = &record.binding {
            let key = (record.room_id, binding.external_player_id.clone());
            if self.by_external.get(&key) == Some(token) {
                self.by_external.remove(&key);
            }
        }

        Some(record)
    }

    /// Removes every session for a room. Returns how many were removed.
    pub fn remove_room(&mut self, room: RoomId) -> usize {
        let Some(tokens) = self.by_room.remove(&room) else {
            return 0;
        };
        tokens
            .iter()
            .filter(|token| self.remove(token).is_some())
            .count()
    }

    /// Removes every session for a room and refuses the room from now on.
    /// Returns how many sessions were removed.
    pub fn close_room(&mut self, room: RoomId) -> usize {
        self.closed.insert(room);
        self.remove_room(room)
    }

    pub fn is_closed(&self, room: RoomId) -> bool {
        self.closed.contains(&room)
    }

    /// Removes every session whose `expires_at` has passed, except those
    /// validated within `touch_grace` of `now`.
    pub fn purge_expired(&mut self, now: Instant, touch_grace: Duration) -> usize {
        let doomed: Vec<SessionToken> = self
            .sessions
            .values()
            .filter(|r| r.is_expired(now) && now.duration_since(r.last_accessed_at) >= touch_grace)
            .map(|r| r.token.clone())
            .collect();

        for token in &doomed {
            self.remove(token);
        }
        doomed.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Number of sessions with an external player binding.
    pub fn bound_count(&self) -> usize {
        self.sessions.values().filter(|r| r.binding.is_some()).count()
    }

    /// Number of sessions currently held for a room.
    pub fn room_len(&self, room: RoomId) -> usize {
        self.by_room.get(&room).map_or(0, HashSet::len)
    }
}
