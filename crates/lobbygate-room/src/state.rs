//! Authoritative per-room game state.
//!
//! A room's state exists from the moment it enters `InGame` until it is
//! terminated. Each room holds:
//!
//! - the versioned payload external games push and pull
//! - a bounded history of accepted game events
//! - the latest reported status of each player (the roster)
//!
//! # Version discipline
//!
//! A push carrying version `v` is applied only if `v` is strictly greater
//! than the stored version. The comparison and the update happen under one
//! lock acquisition, so of two concurrent pushes against the same base at
//! most one wins. The stored version becomes `v`, so it only ever grows.
//!
//! Fan-out happens through the `on_commit` callbacks, which run while the
//! lock is still held. That keeps lobby clients seeing deltas in commit
//! order. Callbacks must not block.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use lobbygate_protocol::{
    EventKind, LockTimeout, PlatformUserId, PlayerPresence, RoomId, lock_within,
};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

use crate::{RoomError, SyncError};

/// The versioned state payload of one room.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomState {
    pub room_id: RoomId,
    pub version: u64,
    pub payload: Value,
    pub updated_at: Instant,
}

/// A game event that was accepted and fanned out.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedEvent {
    pub sequence: u64,
    pub kind: EventKind,
    pub data: Value,
    /// Who the reporting session belongs to, if anyone.
    pub platform_user_id: Option<PlatformUserId>,
}

/// The latest status reported for one player.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerStatusEntry {
    pub status: PlayerPresence,
    pub location: Option<String>,
    pub reason: Option<String>,
    #[serde(skip)]
    pub updated_at: Instant,
}

struct RoomSlot {
    state: RoomState,
    events: VecDeque<RecordedEvent>,
    next_sequence: u64,
    roster: HashMap<PlatformUserId, PlayerStatusEntry>,
}

/// All in-game room state, keyed by room.
pub struct RoomStateStore {
    rooms: Mutex<HashMap<RoomId, RoomSlot>>,
    event_history: usize,
    lock_timeout: Duration,
}

impl RoomStateStore {
    pub fn new(event_history: usize, lock_timeout: Duration) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            event_history: event_history.max(1),
            lock_timeout,
        }
    }

    async fn lock(&self) -> Result<MutexGuard<'_, HashMap<RoomId, RoomSlot>>, LockTimeout> {
        lock_within(&self.rooms, self.lock_timeout).await
    }

    /// Creates `{ version: 0, payload: null }` for a room entering play.
    ///
    /// Returns `false` and leaves the existing state alone if the room
    /// already has one.
    pub async fn create(&self, room: RoomId) -> Result<bool, LockTimeout> {
        let mut rooms = self.lock().await?;
        if rooms.contains_key(&room) {
            return Ok(false);
        }
        rooms.insert(
            room,
            RoomSlot {
                state: RoomState {
                    room_id: room,
                    version: 0,
                    payload: Value::Null,
                    updated_at: Instant::now(),
                },
                events: VecDeque::new(),
                next_sequence: 1,
                roster: HashMap::new(),
            },
        );
        Ok(true)
    }

    /// Drops everything held for a room.
    pub async fn remove(&self, room: RoomId) -> Result<bool, LockTimeout> {
        Ok(self.lock().await?.remove(&room).is_some())
    }

    pub async fn snapshot(&self, room: RoomId) -> Result<Option<RoomState>, LockTimeout> {
        Ok(self.lock().await?.get(&room).map(|slot| slot.state.clone()))
    }

    /// Replaces the payload if `version` exceeds the stored version.
    ///
    /// # Errors
    /// - [`SyncError::StaleWrite`] — `version` ≤ stored; carries the stored
    ///   version
    /// - [`RoomError::NotFound`] — the room has no state
    pub async fn compare_and_set(
        &self,
        room: RoomId,
        version: u64,
        payload: Value,
        on_commit: impl FnOnce(&RoomState),
    ) -> Result<u64, SyncError> {
        let mut rooms = self.lock().await?;
        let slot = rooms.get_mut(&room).ok_or(RoomError::NotFound(room))?;

        if version <= slot.state.version {
            return Err(SyncError::StaleWrite {
                room,
                current: slot.state.version,
            });
        }

        slot.state.version = version;
        slot.state.payload = payload;
        slot.state.updated_at = Instant::now();
        on_commit(&slot.state);
        Ok(version)
    }

    /// Appends an event to the room's history and assigns its sequence
    /// number.
    pub async fn record_event(
        &self,
        room: RoomId,
        kind: EventKind,
        data: Value,
        platform_user_id: Option<PlatformUserId>,
        on_commit: impl FnOnce(&RecordedEvent),
    ) -> Result<u64, SyncError> {
        let mut rooms = self.lock().await?;
        let slot = rooms.get_mut(&room).ok_or(RoomError::NotFound(room))?;

        let event = RecordedEvent {
            sequence: slot.next_sequence,
            kind,
            data,
            platform_user_id,
        };
        slot.next_sequence += 1;

        on_commit(&event);
        let sequence = event.sequence;
        if slot.events.len() == self.event_history {
            slot.events.pop_front();
        }
        slot.events.push_back(event);
        Ok(sequence)
    }

    /// Accepted events still in the history, oldest first.
    pub async fn events(&self, room: RoomId) -> Result<Vec<RecordedEvent>, SyncError> {
        let rooms = self.lock().await?;
        let slot = rooms.get(&room).ok_or(RoomError::NotFound(room))?;
        Ok(slot.events.iter().cloned().collect())
    }

    /// Stores the latest status for a player.
    pub async fn set_status(
        &self,
        room: RoomId,
        player: PlatformUserId,
        entry: PlayerStatusEntry,
        on_commit: impl FnOnce(&PlatformUserId, &PlayerStatusEntry),
    ) -> Result<(), SyncError> {
        let mut rooms = self.lock().await?;
        let slot = rooms.get_mut(&room).ok_or(RoomError::NotFound(room))?;
        on_commit(&player, &entry);
        slot.roster.insert(player, entry);
        Ok(())
    }

    /// Latest status per player, ordered by platform user id.
    pub async fn roster(
        &self,
        room: RoomId,
    ) -> Result<BTreeMap<String, PlayerStatusEntry>, SyncError> {
        let rooms = self.lock().await?;
        let slot = rooms.get(&room).ok_or(RoomError::NotFound(room))?;
        Ok(slot
            .roster
            .iter()
            .map(|(player, entry)| (player.0.clone(), entry.clone()))
            .collect())
    }

    pub async fn len(&self) -> Result<usize, LockTimeout> {
        Ok(self.lock().await?.len())
    }
}
