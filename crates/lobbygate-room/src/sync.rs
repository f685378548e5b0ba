//! The room state synchronizer: everything an external game server can do
//! to a room once it holds a session token.
//!
//! Every operation follows the same pipeline:
//!
//! ```text
//! AuthorizedCaller ──→ require(permission) ──→ validate(token) ──→ phase check ──→ apply
//!                        gateway                 session broker      directory      state store
//!                                                                                       │
//!                                                                       LobbyBroadcast ◄┘
//! ```
//!
//! The caller has already passed [`GatewayAuthenticator::authenticate`]
//! and [`GatewayAuthenticator::admit`] at the HTTP edge. `require` repeats
//! the key check right before the write so that a key revoked in between
//! does not get through.
//!
//! Fan-out is fire-and-forget. A write is durable once the store accepted
//! it; a lobby client missing the delta never rolls it back.

use std::sync::Arc;

use lobbygate_gateway::{AuthorizedCaller, GatewayAuthenticator};
use lobbygate_protocol::{
    EventAck, EventKind, EventRequest, ExternalPlayerId, JoinRequest, JoinResponse, LobbyDelta,
    Permission, PlayerPresence, PlayerStatusRequest, PlayerStatusResponse, ProtocolError,
    PushStateRequest, PushStateResponse, RoomPhase, SessionInfo, SessionToken, StateSnapshot,
};
use lobbygate_session::{EventClaim, PlayerIdentityResolver, SessionBroker, SessionContext};
use serde_json::Value;
use tokio::time::Instant;

use crate::{
    LobbyBroadcast, PlayerStatusEntry, RoomDirectory, RoomError, RoomStateStore, SyncConfig,
    SyncError,
};

/// Applies external game calls to lobby rooms.
pub struct RoomStateSynchronizer {
    broker: Arc<SessionBroker>,
    resolver: PlayerIdentityResolver,
    auth: GatewayAuthenticator,
    directory: Arc<RoomDirectory>,
    states: Arc<RoomStateStore>,
    broadcast: Arc<LobbyBroadcast>,
    config: SyncConfig,
}

impl RoomStateSynchronizer {
    pub fn new(
        broker: Arc<SessionBroker>,
        auth: GatewayAuthenticator,
        directory: Arc<RoomDirectory>,
        states: Arc<RoomStateStore>,
        broadcast: Arc<LobbyBroadcast>,
        config: SyncConfig,
    ) -> Self {
        Self {
            resolver: PlayerIdentityResolver::new(Arc::clone(&broker)),
            broker,
            auth,
            directory,
            states,
            broadcast,
            config,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn resolver(&self) -> &PlayerIdentityResolver {
        &self.resolver
    }

    /// Describes the room behind a token. No room code.
    pub async fn validate_session(
        &self,
        caller: &AuthorizedCaller,
        token: &SessionToken,
    ) -> Result<SessionInfo, SyncError> {
        let ctx = self.session(caller, token, Permission::ValidateSession).await?;
        let phase = self.directory.phase(ctx.room_id).await?;

        Ok(SessionInfo {
            room_id: ctx.room_id,
            game_type: ctx.game_type.clone(),
            streamer_mode: ctx.streamer_mode,
            phase,
            expected_players: ctx.expected_players,
            player_id: ctx.platform_user_id.clone(),
            metadata: ctx.metadata.clone(),
            expires_in_secs: ctx.expires_in().as_secs(),
        })
    }

    /// Registers the external game's player id for this session and
    /// announces the player to the lobby.
    pub async fn join(
        &self,
        caller: &AuthorizedCaller,
        token: &SessionToken,
        request: JoinRequest,
    ) -> Result<JoinResponse, SyncError> {
        let ctx = self.session(caller, token, Permission::ValidateSession).await?;
        self.require_phase(&ctx, |p| p.accepts_sessions()).await?;

        let platform_user_id = self
            .resolver
            .bind(token, &request.external_player_id)
            .await?;

        let room_id = ctx.room_id;
        let display_name = request.display_name;
        let entry = PlayerStatusEntry {
            status: PlayerPresence::Online,
            location: None,
            reason: None,
            updated_at: Instant::now(),
        };
        self.states
            .set_status(room_id, platform_user_id.clone(), entry, |player, _| {
                self.broadcast.publish(LobbyDelta::PlayerJoined {
                    room_id,
                    platform_user_id: player.clone(),
                    display_name,
                });
            })
            .await?;

        Ok(JoinResponse {
            room_id,
            platform_user_id,
        })
    }

    /// Applies a versioned state push.
    ///
    /// # Errors
    /// - [`SyncError::StaleWrite`] — `version` does not exceed the stored
    ///   version; the error carries the stored version
    /// - [`SyncError::InvalidRoomState`] — the room is not in game
    pub async fn push(
        &self,
        caller: &AuthorizedCaller,
        token: &SessionToken,
        request: PushStateRequest,
    ) -> Result<PushStateResponse, SyncError> {
        let ctx = self.session(caller, token, Permission::WriteState).await?;
        self.check_size(&request.payload)?;
        self.require_phase(&ctx, |p| p.accepts_writes()).await?;

        let room_id = ctx.room_id;
        let result = self
            .states
            .compare_and_set(room_id, request.version, request.payload, |state| {
                self.broadcast.publish(LobbyDelta::StateChanged {
                    room_id,
                    version: state.version,
                    payload: state.payload.clone(),
                });
            })
            .await;

        match result {
            Ok(version) => {
                tracing::debug!(%room_id, version, "state pushed");
                Ok(PushStateResponse { version })
            }
            Err(SyncError::StaleWrite { room, current }) => {
                tracing::debug!(%room, current, attempted = request.version, "stale state push rejected");
                Err(SyncError::StaleWrite { room, current })
            }
            Err(e) => Err(e),
        }
    }

    /// Reads the authoritative state.
    pub async fn pull(
        &self,
        caller: &AuthorizedCaller,
        token: &SessionToken,
    ) -> Result<StateSnapshot, SyncError> {
        let ctx = self.session(caller, token, Permission::ReadState).await?;
        self.require_phase(&ctx, |p| p.is_readable()).await?;

        let state = self
            .states
            .snapshot(ctx.room_id)
            .await?
            .ok_or(RoomError::NotFound(ctx.room_id))?;
        Ok(StateSnapshot {
            version: state.version,
            payload: state.payload,
        })
    }

    /// Records a player's status after reconciling the external id with
    /// the session's bound identity.
    ///
    /// # Errors
    /// - [`SessionError::PlayerNotFound`](lobbygate_session::SessionError::PlayerNotFound)
    ///   — `external` is not the id bound to this session
    pub async fn update_player_status(
        &self,
        caller: &AuthorizedCaller,
        token: &SessionToken,
        external: &ExternalPlayerId,
        request: PlayerStatusRequest,
    ) -> Result<PlayerStatusResponse, SyncError> {
        let ctx = self.session(caller, token, Permission::UpdatePlayerStatus).await?;
        let platform_user_id = self.resolver.resolve(token, external).await?;
        self.require_phase(&ctx, |p| p.is_readable()).await?;

        let room_id = ctx.room_id;
        let status = request.status;
        let entry = PlayerStatusEntry {
            status,
            location: request.location,
            reason: request.reason,
            updated_at: Instant::now(),
        };
        self.states
            .set_status(room_id, platform_user_id.clone(), entry, |player, entry| {
                self.broadcast.publish(LobbyDelta::PlayerStatus {
                    room_id,
                    platform_user_id: player.clone(),
                    status: entry.status,
                    location: entry.location.clone(),
                    reason: entry.reason.clone(),
                });
            })
            .await?;

        tracing::debug!(%room_id, player = %platform_user_id, ?status, "player status updated");
        Ok(PlayerStatusResponse {
            platform_user_id,
            status,
        })
    }

    /// Accepts a discrete game event.
    ///
    /// With an idempotency key, the first call for that key on this session
    /// records the event; a repeat after it was recorded is acknowledged as
    /// a duplicate carrying the original sequence. A repeat while the first
    /// call is still recording fails with [`SyncError::EventInFlight`].
    /// `match_completed` moves the room to `Finished`.
    pub async fn event(
        &self,
        caller: &AuthorizedCaller,
        token: &SessionToken,
        request: EventRequest,
    ) -> Result<EventAck, SyncError> {
        let ctx = self.session(caller, token, Permission::EmitEvents).await?;
        if matches!(&request.kind, EventKind::Custom(name) if name.trim().is_empty()) {
            return Err(ProtocolError::InvalidMessage("event type must not be empty".into()).into());
        }
        if matches!(&request.idempotency_key, Some(key) if key.trim().is_empty()) {
            return Err(ProtocolError::InvalidMessage("idempotency key must not be empty".into()).into());
        }
        self.check_size(&request.data)?;

        let Some(key) = request.idempotency_key else {
            let sequence = self.record_event(&ctx, request.kind, request.data).await?;
            return Ok(EventAck {
                sequence,
                duplicate: false,
            });
        };

        match self.broker.claim_event_key(token, &key).await? {
            EventClaim::Claimed => {}
            EventClaim::Recorded(sequence) => {
                tracing::debug!(room_id = %ctx.room_id, key = %key, sequence, "duplicate event acknowledged");
                return Ok(EventAck {
                    sequence,
                    duplicate: true,
                });
            }
            EventClaim::InFlight => {
                return Err(SyncError::EventInFlight {
                    room: ctx.room_id,
                    key,
                });
            }
        }

        match self.record_event(&ctx, request.kind, request.data).await {
            Ok(sequence) => {
                if let Err(e) = self.broker.complete_event_key(token, &key, sequence).await {
                    tracing::warn!(room_id = %ctx.room_id, error = %e, "failed to complete event key");
                }
                Ok(EventAck {
                    sequence,
                    duplicate: false,
                })
            }
            Err(e) => {
                // Not recorded: let a retry with the same key through.
                if let Err(release) = self.broker.release_event_key(token, &key).await {
                    tracing::warn!(room_id = %ctx.room_id, error = %release, "failed to release event key");
                }
                Err(e)
            }
        }
    }

    async fn record_event(
        &self,
        ctx: &SessionContext,
        kind: EventKind,
        data: Value,
    ) -> Result<u64, SyncError> {
        self.require_phase(ctx, |p| p.accepts_writes()).await?;

        let room_id = ctx.room_id;
        let completes = kind == EventKind::MatchCompleted;
        let sequence = self
            .states
            .record_event(room_id, kind, data, ctx.platform_user_id.clone(), |event| {
                self.broadcast.publish(LobbyDelta::GameEvent {
                    room_id,
                    sequence: event.sequence,
                    kind: event.kind.clone(),
                    data: event.data.clone(),
                });
            })
            .await?;

        if completes {
            match self.directory.finish(room_id).await {
                Ok(()) => {}
                Err(RoomError::InvalidTransition { .. }) => {
                    tracing::debug!(%room_id, "room already past in-game");
                }
                Err(e) => tracing::warn!(%room_id, error = %e, "failed to finish room after match_completed"),
            }
        }
        Ok(sequence)
    }

    /// Re-checks the caller's key, then resolves the token.
    async fn session(
        &self,
        caller: &AuthorizedCaller,
        token: &SessionToken,
        permission: Permission,
    ) -> Result<SessionContext, SyncError> {
        self.auth.require(caller, permission).await?;
        Ok(self.broker.validate(token).await?)
    }

    async fn require_phase(
        &self,
        ctx: &SessionContext,
        allowed: impl Fn(RoomPhase) -> bool,
    ) -> Result<(), SyncError> {
        let phase = self.directory.phase(ctx.room_id).await?;
        if !allowed(phase) {
            return Err(SyncError::InvalidRoomState {
                room: ctx.room_id,
                phase,
            });
        }
        Ok(())
    }

    fn check_size(&self, value: &Value) -> Result<(), ProtocolError> {
        let size = serde_json::to_vec(value)
            .map_err(|e| ProtocolError::InvalidMessage(e.to_string()))?
            .len();
        if size > self.config.max_payload_bytes {
            return Err(ProtocolError::PayloadTooLarge {
                size,
                limit: self.config.max_payload_bytes,
            });
        }
        Ok(())
    }
}
