//! Room lifecycle and state synchronization for lobbygate.
//!
//! The lobby opens rooms and moves them through their phases; external game
//! servers push and pull the authoritative state of in-game rooms; lobby
//! clients watch every change through a per-room broadcast.
//!
//! # Key types
//!
//! - [`RoomDirectory`]: opens rooms, drives `Waiting → InGame → Finished →
//!   Terminated`, hands out [`RoomTicket`](lobbygate_session::RoomTicket)s
//! - [`RoomStateStore`]: versioned payload, event history, and player
//!   roster per room, with compare-and-set writes
//! - [`LobbyBroadcast`]: per-room fan-out of
//!   [`LobbyDelta`](lobbygate_protocol::LobbyDelta)s
//! - [`RoomStateSynchronizer`]: the gateway operations (validate, join,
//!   push, pull, player status, events)
//! - [`SyncConfig`]: payload and history limits

mod broadcast;
mod config;
mod directory;
mod error;
mod state;
mod sync;

pub use broadcast::LobbyBroadcast;
pub use config::SyncConfig;
pub use directory::{RoomDirectory, RoomEntry, RoomInfo};
pub use error::{RoomError, SyncError};
pub use state::{PlayerStatusEntry, RecordedEvent, RoomState, RoomStateStore};
pub use sync::RoomStateSynchronizer;
