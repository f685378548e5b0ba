//! The session broker: issues, validates, and revokes session tokens.
//!
//! This is the only way into the [`TokenStore`]. It owns the store behind a
//! single mutex and acquires that mutex with a deadline, so every operation
//! either completes or fails with [`SessionError::Unavailable`].
//!
//! ## Lifecycle
//!
//! ```text
//! issue() ──→ validate() / bind() ──→ … ──→ revoke(room)   (room closed for good)
//!                                      └──→ sweep()        (expired)
//! ```

use futures_util::future::BoxFuture;
use lobbygate_protocol::{RoomId, RoomPhase, SessionToken, lock_within};
use lobbygate_sweep::{SweepError, SweepTarget};
use rand::Rng;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::Instant;

use crate::{
    EventClaim, EventKeys, IssueRequest, RoomTicket, SessionConfig, SessionContext, SessionError,
    SessionRecord, SessionStats, TokenStore,
};

/// Issues and checks session tokens.
///
/// Shared behind an `Arc` by the identity resolver, the room synchronizer,
/// and the cleanup scheduler.
pub struct SessionBroker {
    store: Mutex<TokenStore>,
    config: SessionConfig,
}

impl SessionBroker {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            store: Mutex::new(TokenStore::new()),
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Acquires the store lock within `lock_timeout`.
    pub(crate) async fn lock(&self) -> Result<MutexGuard<'_, TokenStore>, SessionError> {
        Ok(lock_within(&self.store, self.config.lock_timeout).await?)
    }

    /// Issues a new token for `ticket`'s room.
    ///
    /// The token is 256 bits from the thread-local CSPRNG and has no
    /// relation to the room code, the room id, or any counter.
    ///
    /// The ticket may be stale by the time the store lock is held. A room
    /// already passed to [`revoke`](Self::revoke) is refused under that
    /// lock, so no token outlives its room's revocation.
    ///
    /// # Errors
    /// - [`SessionError::InvalidRoomState`] — the room is not in game, or
    ///   has been revoked
    pub async fn issue(
        &self,
        ticket: &RoomTicket,
        request: IssueRequest,
    ) -> Result<SessionToken, SessionError> {
        if !ticket.phase.accepts_sessions() {
            return Err(SessionError::InvalidRoomState {
                room: ticket.room_id,
                phase: ticket.phase,
            });
        }

        let ttl = request.ttl.unwrap_or(self.config.default_ttl);
        let mut store = self.lock().await?;
        if store.is_closed(ticket.room_id) {
            return Err(SessionError::InvalidRoomState {
                room: ticket.room_id,
                phase: RoomPhase::Terminated,
            });
        }

        let token = loop {
            let candidate = generate_token();
            if !store.contains(&candidate) {
                break candidate;
            }
        };

        let now = Instant::now();
        let record = SessionRecord {
            token: token.clone(),
            room_id: ticket.room_id,
            room_code: ticket.room_code.clone(),
            platform_user_id: request.player,
            game_type: request.game_type,
            streamer_mode: request.streamer_mode,
            metadata: request.metadata,
            expected_players: ticket.expected_players,
            created_at: now,
            expires_at: now + ttl,
            last_accessed_at: now,
            binding: None,
            event_keys: EventKeys::default(),
        };
        let player = record.platform_user_id.clone();

        if let Some(old) = store.insert(record) {
            tracing::info!(
                room_id = %ticket.room_id,
                old_token = %old.token,
                "previous session for player replaced"
            );
        }

        tracing::info!(
            room_id = %ticket.room_id,
            player = ?player,
            %token,
            ttl_secs = ttl.as_secs(),
            "session issued"
        );
        Ok(token)
    }

    /// Resolves a token to its room/player context and marks it used.
    ///
    /// # Errors
    /// - [`SessionError::TokenNotFound`] — unknown, revoked, or purged
    /// - [`SessionError::TokenExpired`] — past `expires_at`
    pub async fn validate(&self, token: &SessionToken) -> Result<SessionContext, SessionError> {
        let mut store = self.lock().await?;
        let record = live_record(&mut store, token)?;
        Ok(record.context())
    }

    /// Revokes every token for a room and refuses to issue new ones for it.
    /// Idempotent; returns how many were revoked.
    pub async fn revoke(&self, room: RoomId) -> Result<usize, SessionError> {
        let revoked = self.lock().await?.close_room(room);
        if revoked > 0 {
            tracing::info!(room_id = %room, revoked, "room sessions revoked");
        }
        Ok(revoked)
    }

    /// Revokes a single token. Returns `false` if it was already gone.
    pub async fn revoke_token(&self, token: &SessionToken) -> Result<bool, SessionError> {
        let removed = self.lock().await?.remove(token);
        if let Some(record) = &removed {
            tracing::info!(room_id = %record.room_id, %token, "session revoked");
        }
        Ok(removed.is_some())
    }

    /// Claims an event idempotency key for the session.
    ///
    /// Check and insert happen under one lock. On [`EventClaim::Claimed`]
    /// the caller owns the key until it calls
    /// [`complete_event_key`](Self::complete_event_key) or
    /// [`release_event_key`](Self::release_event_key).
    pub async fn claim_event_key(
        &self,
        token: &SessionToken,
        key: &str,
    ) -> Result<EventClaim, SessionError> {
        let cap = self.config.max_event_keys;
        let mut store = self.lock().await?;
        let record = live_record(&mut store, token)?;
        Ok(record.event_keys.claim(key, cap))
    }

    /// Marks a claimed key as recorded at `sequence`.
    pub async fn complete_event_key(
        &self,
        token: &SessionToken,
        key: &str,
        sequence: u64,
    ) -> Result<(), SessionError> {
        if let Some(record) = self.lock().await?.get_mut(token) {
            record.event_keys.complete(key, sequence);
        }
        Ok(())
    }

    /// Forgets a claimed key whose event was not recorded after all.
    pub async fn release_event_key(
        &self,
        token: &SessionToken,
        key: &str,
    ) -> Result<(), SessionError> {
        if let Some(record) = self.lock().await?.get_mut(token) {
            record.event_keys.release(key);
        }
        Ok(())
    }

    /// Purges every expired session not touched within `touch_grace`.
    pub async fn sweep_expired(&self) -> Result<usize, SessionError> {
        let purged = self
            .lock()
            .await?
            .purge_expired(Instant::now(), self.config.touch_grace);
        if purged > 0 {
            tracing::debug!(purged, "expired sessions purged");
        }
        Ok(purged)
    }

    pub async fn stats(&self) -> Result<SessionStats, SessionError> {
        let store = self.lock().await?;
        Ok(SessionStats {
            stored: store.len(),
            bound: store.bound_count(),
        })
    }
}

impl SweepTarget for SessionBroker {
    fn name(&self) -> &'static str {
        "sessions"
    }

    fn sweep(&self) -> BoxFuture<'_, Result<usize, SweepError>> {
        Box::pin(async move {
            self.sweep_expired()
                .await
                .map_err(|e| SweepError::Unavailable(e.to_string()))
        })
    }
}

/// Looks up a token, rejects it if expired, and touches it.
///
/// Expired records are left in place for the sweeper; they are not
/// touched, so a failed validation never extends their life.
pub(crate) fn live_record<'a>(
    store: &'a mut TokenStore,
    token: &SessionToken,
) -> Result<&'a mut SessionRecord, SessionError> {
    let now = Instant::now();
    let record = store.get_mut(token).ok_or(SessionError::TokenNotFound)?;
    if record.is_expired(now) {
        return Err(SessionError::TokenExpired);
    }
    record.last_accessed_at = now;
    Ok(record)
}

/// Generates a random 64-character hex token (256 bits of entropy).
fn generate_token() -> SessionToken {
    let bytes: [u8; 32] = rand::rng().random();
    SessionToken::new(hex::encode(bytes))
}
