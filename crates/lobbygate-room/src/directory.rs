//! The lobby-side room directory.
//!
//! Tracks every room the lobby created and drives its phase:
//!
//! ```text
//! open() ──→ Waiting ──start_game()──→ InGame ──finish()──→ Finished
//!               │                        │                     │
//!               └────────────────────────┴──terminate()────────┴──→ Terminated
//! ```
//!
//! `start_game` and `finish` follow the phase order strictly. `terminate`
//! may be applied from any phase and is idempotent; it revokes every
//! session token for the room, drops its state, and closes its fan-out
//! channel.
//!
//! Room codes are the lobby's human-friendly join codes. They are kept
//! here and in session records only; nothing handed to an external game
//! carries one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lobbygate_protocol::{LobbyDelta, RoomCode, RoomId, RoomPhase, lock_within};
use lobbygate_session::{RoomTicket, SessionBroker};
use rand::Rng;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

use crate::{LobbyBroadcast, RoomError, RoomStateStore};

const CODE_LEN: usize = 6;
const CODE_CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// A lobby room as the directory tracks it.
#[derive(Debug, Clone)]
pub struct RoomEntry {
    pub id: RoomId,
    pub code: RoomCode,
    pub game_type: String,
    pub phase: RoomPhase,
    pub expected_players: u32,
    pub created_at: Instant,
}

/// Public view of a room. No room code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub game_type: String,
    pub phase: RoomPhase,
    pub expected_players: u32,
}

#[derive(Default)]
struct Rooms {
    entries: HashMap<RoomId, RoomEntry>,
    by_code: HashMap<RoomCode, RoomId>,
    next_id: u64,
}

/// Creates rooms and moves them through their phases.
pub struct RoomDirectory {
    rooms: Mutex<Rooms>,
    broker: Arc<SessionBroker>,
    states: Arc<RoomStateStore>,
    broadcast: Arc<LobbyBroadcast>,
    lock_timeout: Duration,
}

impl RoomDirectory {
    pub fn new(
        broker: Arc<SessionBroker>,
        states: Arc<RoomStateStore>,
        broadcast: Arc<LobbyBroadcast>,
        lock_timeout: Duration,
    ) -> Self {
        Self {
            rooms: Mutex::new(Rooms {
                next_id: 1,
                ..Default::default()
            }),
            broker,
            states,
            broadcast,
            lock_timeout,
        }
    }

    async fn lock(&self) -> Result<MutexGuard<'_, Rooms>, RoomError> {
        Ok(lock_within(&self.rooms, self.lock_timeout).await?)
    }

    /// Opens a new room in `Waiting` with a fresh, unique room code.
    pub async fn open(
        &self,
        game_type: impl Into<String>,
        expected_players: u32,
    ) -> Result<(RoomId, RoomCode), RoomError> {
        if expected_players == 0 {
            return Err(RoomError::NoPlayers);
        }

        let mut rooms = self.lock().await?;
        let code = loop {
            let candidate = generate_code();
            if !rooms.by_code.contains_key(&candidate) {
                break candidate;
            }
        };

        let id = RoomId(rooms.next_id);
        rooms.next_id += 1;

        let entry = RoomEntry {
            id,
            code: code.clone(),
            game_type: game_type.into(),
            phase: RoomPhase::Waiting,
            expected_players,
            created_at: Instant::now(),
        };
        tracing::info!(room_id = %id, game_type = %entry.game_type, expected_players, "room opened");

        rooms.by_code.insert(code.clone(), id);
        rooms.entries.insert(id, entry);
        Ok((id, code))
    }

    /// Looks a room up by its join code. Lobby-internal.
    pub async fn find_by_code(&self, code: &RoomCode) -> Result<Option<RoomId>, RoomError> {
        Ok(self.lock().await?.by_code.get(code).copied())
    }

    /// Moves a room from `Waiting` to `InGame` and creates its state at
    /// version 0.
    pub async fn start_game(&self, room: RoomId) -> Result<(), RoomError> {
        // State first, so a session issued right after the phase flips
        // always finds it.
        let created = self.states.create(room).await?;
        if let Err(e) = self.advance(room, RoomPhase::InGame).await {
            if created {
                self.states.remove(room).await?;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Moves a room from `InGame` to `Finished`.
    pub async fn finish(&self, room: RoomId) -> Result<(), RoomError> {
        self.advance(room, RoomPhase::Finished).await
    }

    /// Ends a room from any phase.
    ///
    /// Returns how many session tokens were revoked. Terminating an already
    /// terminated room repeats the revocation, which finds nothing unless an
    /// earlier attempt failed part way, and publishes nothing.
    pub async fn terminate(&self, room: RoomId) -> Result<usize, RoomError> {
        let newly_terminated = {
            let mut rooms = self.lock().await?;
            let entry = rooms.entries.get_mut(&room).ok_or(RoomError::NotFound(room))?;
            if entry.phase == RoomPhase::Terminated {
                false
            } else {
                entry.phase = RoomPhase::Terminated;
                let code = entry.code.clone();
                rooms.by_code.remove(&code);
                true
            }
        };

        let revoked = self.broker.revoke(room).await?;
        self.states.remove(room).await?;
        if !newly_terminated {
            return Ok(revoked);
        }

        self.broadcast.publish(LobbyDelta::PhaseChanged {
            room_id: room,
            phase: RoomPhase::Terminated,
        });
        self.broadcast.close(room);

        tracing::info!(room_id = %room, revoked, "room terminated");
        Ok(revoked)
    }

    /// What [`SessionBroker::issue`] needs to know about a room.
    pub async fn ticket(&self, room: RoomId) -> Result<RoomTicket, RoomError> {
        let rooms = self.lock().await?;
        let entry = rooms.entries.get(&room).ok_or(RoomError::NotFound(room))?;
        Ok(RoomTicket {
            room_id: entry.id,
            room_code: entry.code.clone(),
            phase: entry.phase,
            expected_players: entry.expected_players,
        })
    }

    pub async fn phase(&self, room: RoomId) -> Result<RoomPhase, RoomError> {
        let rooms = self.lock().await?;
        rooms
            .entries
            .get(&room)
            .map(|e| e.phase)
            .ok_or(RoomError::NotFound(room))
    }

    pub async fn get(&self, room: RoomId) -> Result<RoomEntry, RoomError> {
        let rooms = self.lock().await?;
        rooms.entries.get(&room).cloned().ok_or(RoomError::NotFound(room))
    }

    pub async fn info(&self, room: RoomId) -> Result<RoomInfo, RoomError> {
        let entry = self.get(room).await?;
        Ok(RoomInfo {
            room_id: entry.id,
            game_type: entry.game_type,
            phase: entry.phase,
            expected_players: entry.expected_players,
        })
    }

    pub async fn len(&self) -> Result<usize, RoomError> {
        Ok(self.lock().await?.entries.len())
    }

    /// Applies one strict phase step and announces it to lobby clients.
    async fn advance(&self, room: RoomId, to: RoomPhase) -> Result<(), RoomError> {
        let mut rooms = self.lock().await?;
        let entry = rooms.entries.get_mut(&room).ok_or(RoomError::NotFound(room))?;
        if !entry.phase.can_transition_to(to) {
            return Err(RoomError::InvalidTransition {
                room,
                from: entry.phase,
                to,
            });
        }
        entry.phase = to;
        tracing::info!(room_id = %room, phase = %to, "room phase changed");
        self.broadcast.publish(LobbyDelta::PhaseChanged {
            room_id: room,
            phase: to,
        });
        Ok(())
    }
}

/// Six characters from an alphabet without look-alikes (no I, O, 0, 1).
fn generate_code() -> RoomCode {
    let mut rng = rand::rng();
    let code: String = (0..CODE_LEN)
        .map(|_| CODE_CHARSET[rng.random_range(0..CODE_CHARSET.len())] as char)
        .collect();
    RoomCode::new(code)
}

#[cfg(test)]
mod tests {
    use lobbygate_session::{IssueRequest, SessionConfig, SessionError};
    use lobbygate_protocol::PlatformUserId;

    use super::*;

    struct Fixture {
        broker: Arc<SessionBroker>,
        states: Arc<RoomStateStore>,
        broadcast: Arc<LobbyBroadcast>,
        directory: RoomDirectory,
    }

    fn fixture() -> Fixture {
        let broker = Arc::new(SessionBroker::new(SessionConfig::default()));
        let states = Arc::new(RoomStateStore::new(16, Duration::from_secs(1)));
        let broadcast = Arc::new(LobbyBroadcast::default());
        let directory = RoomDirectory::new(
            Arc::clone(&broker),
            Arc::clone(&states),
            Arc::clone(&broadcast),
            Duration::from_secs(1),
        );
        Fixture {
            broker,
            states,
            broadcast,
            directory,
        }
    }

    #[test]
    fn test_generate_code_shape() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.as_str().len(), CODE_LEN);
            assert!(code.as_str().bytes().all(|b| CODE_CHARSET.contains(&b)));
        }
    }

    #[tokio::test]
    async fn test_open_starts_waiting_and_is_findable_by_code() {
        let f = fixture();
        let (id, code) = f.directory.open("trivia", 4).await.unwrap();

        assert_eq!(f.directory.phase(id).await.unwrap(), RoomPhase::Waiting);
        assert_eq!(f.directory.find_by_code(&code).await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn test_open_zero_players_rejected() {
        let f = fixture();
        assert!(matches!(f.directory.open("trivia", 0).await, Err(RoomError::NoPlayers)));
    }

    #[tokio::test]
    async fn test_start_game_creates_state_at_version_zero() {
        let f = fixture();
        let (id, _) = f.directory.open("trivia", 2).await.unwrap();

        f.directory.start_game(id).await.unwrap();

        assert_eq!(f.directory.phase(id).await.unwrap(), RoomPhase::InGame);
        assert_eq!(f.states.snapshot(id).await.unwrap().unwrap().version, 0);
    }

    #[tokio::test]
    async fn test_finish_from_waiting_is_invalid_transition() {
        let f = fixture();
        let (id, _) = f.directory.open("trivia", 2).await.unwrap();

        let result = f.directory.finish(id).await;

        assert!(matches!(
            result,
            Err(RoomError::InvalidTransition { from: RoomPhase::Waiting, to: RoomPhase::Finished, .. })
        ));
    }

    #[tokio::test]
    async fn test_ticket_before_start_is_not_eligible_for_sessions() {
        let f = fixture();
        let (id, _) = f.directory.open("trivia", 2).await.unwrap();
        let ticket = f.directory.ticket(id).await.unwrap();

        let result = f.broker.issue(&ticket, IssueRequest::default()).await;

        assert!(matches!(result, Err(SessionError::InvalidRoomState { .. })));
    }

    #[tokio::test]
    async fn test_terminate_revokes_sessions_and_drops_state() {
        let f = fixture();
        let (id, code) = f.directory.open("trivia", 2).await.unwrap();
        f.directory.start_game(id).await.unwrap();
        let ticket = f.directory.ticket(id).await.unwrap();
        let token = f
            .broker
            .issue(
                &ticket,
                IssueRequest {
                    player: Some(PlatformUserId::new("U1")),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let mut rx = f.broadcast.subscribe(id);

        assert_eq!(f.directory.terminate(id).await.unwrap(), 1);

        assert!(matches!(f.broker.validate(&token).await, Err(SessionError::TokenNotFound)));
        assert!(f.states.snapshot(id).await.unwrap().is_none());
        assert_eq!(f.directory.find_by_code(&code).await.unwrap(), None);
        assert!(matches!(
            rx.recv().await.unwrap().as_ref(),
            LobbyDelta::PhaseChanged { phase: RoomPhase::Terminated, .. }
        ));
        assert!(rx.recv().await.is_err());
    }

    #[tokio::test]
    async fn test_terminate_twice_is_idempotent() {
        let f = fixture();
        let (id, _) = f.directory.open("trivia", 2).await.unwrap();

        f.directory.terminate(id).await.unwrap();
        assert_eq!(f.directory.terminate(id).await.unwrap(), 0);
        assert_eq!(f.directory.phase(id).await.unwrap(), RoomPhase::Terminated);
    }

    #[tokio::test]
    async fn test_terminated_room_ticket_rejected_by_broker() {
        let f = fixture();
        let (id, _) = f.directory.open("trivia", 2).await.unwrap();
        f.directory.start_game(id).await.unwrap();
        f.directory.terminate(id).await.unwrap();

        let ticket = f.directory.ticket(id).await.unwrap();
        let result = f.broker.issue(&ticket, IssueRequest::default()).await;

        assert!(matches!(
            result,
            Err(SessionError::InvalidRoomState { phase: RoomPhase::Terminated, .. })
        ));
    }
}
