//! Per-room fan-out of [`LobbyDelta`]s to lobby clients.
//!
//! One `tokio::sync::broadcast` channel per room, created on first use.
//! Publishing is fire-and-forget: it never waits on subscribers, a room
//! with no subscribers is not an error, and a subscriber that falls more
//! than `capacity` messages behind skips ahead (`RecvError::Lagged`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lobbygate_protocol::{LobbyDelta, RoomId};
use tokio::sync::broadcast;

/// Fan-out hub keyed by room.
///
/// The map sits behind a `std` mutex: every critical section is a lookup
/// or insert with no `.await`.
pub struct LobbyBroadcast {
    channels: Mutex<HashMap<RoomId, broadcast::Sender<Arc<LobbyDelta>>>>,
    capacity: usize,
}

impl LobbyBroadcast {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Subscribes to a room's deltas, opening its channel if needed.
    pub fn subscribe(&self, room: RoomId) -> broadcast::Receiver<Arc<LobbyDelta>> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(room)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Sends `delta` to everyone subscribed to its room.
    ///
    /// Returns how many subscribers it reached.
    pub fn publish(&self, delta: LobbyDelta) -> usize {
        let room = delta.room_id();
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let Some(sender) = channels.get(&room) else {
            tracing::trace!(%room, "no lobby subscribers");
            return 0;
        };
        // Err only means there are no receivers right now.
        sender.send(Arc::new(delta)).unwrap_or(0)
    }

    /// Drops a room's channel. Subscribers see the stream end.
    pub fn close(&self, room: RoomId) -> bool {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.remove(&room).is_some()
    }

    pub fn subscriber_count(&self, room: RoomId) -> usize {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.get(&room).map_or(0, broadcast::Sender::receiver_count)
    }
}

impl Default for LobbyBroadcast {
    fn default() -> Self {
        Self::new(256)
    }
}
