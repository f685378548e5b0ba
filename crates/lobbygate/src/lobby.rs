//! The lobby-side facade.
//!
//! A [`Lobby`] owns one instance of every gateway component and wires them
//! together. The HTTP layer only ever talks to this type; the lobby itself
//! uses it to open rooms, start games, and hand players off to external
//! games.

use std::sync::Arc;
use std::time::Duration;

use lobbygate_gateway::{
    ApiKeyRegistry, GatewayAuthenticator, RateLimitClass, RateLimiter, RawApiKey, UsageLedger,
};
use lobbygate_protocol::{
    ApiKeyId, LobbyDelta, Metadata, Permission, PlatformUserId, PlayerRole, RoomCode, RoomId,
    RoomPhase, SessionToken,
};
use lobbygate_room::{LobbyBroadcast, RoomDirectory, RoomStateStore, RoomStateSynchronizer};
use lobbygate_session::{IssueRequest, SessionBroker};
use tokio::sync::broadcast;
use url::Url;

use crate::launch::{LaunchParams, launch_url, parse_base};
use crate::{ConfigError, GatewayConfig, GatewayError};

/// Who is being launched into an external game, and how.
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
    /// Ignored for spectators.
    pub player: Option<PlatformUserId>,
    pub display_name: Option<String>,
    pub role: PlayerRole,
    pub streamer_mode: bool,
    pub metadata: Metadata,
    /// `None` uses the session default.
    pub ttl: Option<Duration>,
}

/// A freshly issued session and the URL that carries it.
#[derive(Debug, Clone)]
pub struct Launch {
    pub token: SessionToken,
    pub url: Url,
}

/// Every gateway component, wired together.
pub struct Lobby {
    config: GatewayConfig,
    game_base_url: Url,
    broker: Arc<SessionBroker>,
    auth: GatewayAuthenticator,
    broadcast: Arc<LobbyBroadcast>,
    directory: Arc<RoomDirectory>,
    sync: RoomStateSynchronizer,
}

impl Lobby {
    /// Builds all components from `config`.
    ///
    /// # Errors
    /// - [`ConfigError::GameBaseUrl`] — `game_base_url` is not an absolute
    ///   http(s) URL
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        let game_base_url = parse_base(&config.game_base_url)
            .ok_or_else(|| ConfigError::GameBaseUrl(config.game_base_url.clone()))?;

        let lock_timeout = config.sync.lock_timeout;
        let broker = Arc::new(SessionBroker::new(config.session.clone()));
        let registry = Arc::new(ApiKeyRegistry::new(lock_timeout));
        let limiter = Arc::new(RateLimiter::new(config.rate_limits.clone(), lock_timeout));
        let ledger = Arc::new(UsageLedger::new(config.usage_retention));
        let auth = GatewayAuthenticator::new(registry, limiter, ledger);

        let broadcast = Arc::new(LobbyBroadcast::new(config.sync.broadcast_capacity));
        let states = Arc::new(RoomStateStore::new(config.sync.event_history, lock_timeout));
        let directory = Arc::new(RoomDirectory::new(
            Arc::clone(&broker),
            Arc::clone(&states),
            Arc::clone(&broadcast),
            lock_timeout,
        ));
        let sync = RoomStateSynchronizer::new(
            Arc::clone(&broker),
            auth.clone(),
            Arc::clone(&directory),
            states,
            Arc::clone(&broadcast),
            config.sync.clone(),
        );

        Ok(Self {
            config,
            game_base_url,
            broker,
            auth,
            broadcast,
            directory,
            sync,
        })
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn broker(&self) -> &Arc<SessionBroker> {
        &self.broker
    }

    pub fn auth(&self) -> &GatewayAuthenticator {
        &self.auth
    }

    pub fn directory(&self) -> &Arc<RoomDirectory> {
        &self.directory
    }

    pub fn sync(&self) -> &RoomStateSynchronizer {
        &self.sync
    }

    /// Opens a room in `Waiting`.
    pub async fn open_room(
        &self,
        game_type: impl Into<String>,
        expected_players: u32,
    ) -> Result<(RoomId, RoomCode), GatewayError> {
        Ok(self.directory.open(game_type, expected_players).await?)
    }

    pub async fn start_game(&self, room: RoomId) -> Result<(), GatewayError> {
        Ok(self.directory.start_game(room).await?)
    }

    pub async fn finish(&self, room: RoomId) -> Result<(), GatewayError> {
        Ok(self.directory.finish(room).await?)
    }

    /// Ends a room and revokes every token issued for it.
    pub async fn terminate(&self, room: RoomId) -> Result<usize, GatewayError> {
        Ok(self.directory.terminate(room).await?)
    }

    /// Issues a session for `request` and builds the launch URL.
    ///
    /// Safe to race with [`terminate`](Self::terminate): the broker refuses
    /// rooms it has already revoked, and revocation removes anything issued
    /// before that.
    ///
    /// # Errors
    /// - [`SessionError::InvalidRoomState`](lobbygate_session::SessionError::InvalidRoomState)
    ///   — the room is not in game
    pub async fn launch(&self, room: RoomId, request: LaunchRequest) -> Result<Launch, GatewayError> {
        let entry = self.directory.get(room).await?;
        let ticket = self.directory.ticket(room).await?;

        let player = match request.role {
            PlayerRole::Spectator => None,
            PlayerRole::Player | PlayerRole::Host => request.player,
        };

        let token = self
            .broker
            .issue(
                &ticket,
                IssueRequest {
                    player: player.clone(),
                    game_type: entry.game_type,
                    streamer_mode: request.streamer_mode,
                    metadata: request.metadata,
                    ttl: request.ttl,
                },
            )
            .await?;

        let url = launch_url(
            &self.game_base_url,
            &LaunchParams {
                token: &token,
                room_id: room,
                expected_players: ticket.expected_players,
                display_name: request.display_name.as_deref(),
                player: player.as_ref(),
                role: request.role,
                streamer_mode: request.streamer_mode,
            },
        );
        Ok(Launch { token, url })
    }

    /// Provisions an API key for an external game service. The raw key is
    /// returned once and never stored.
    pub async fn provision_key(
        &self,
        service: impl Into<String>,
        scope: impl IntoIterator<Item = Permission>,
        class: RateLimitClass,
    ) -> Result<(ApiKeyId, RawApiKey), GatewayError> {
        Ok(self.auth.registry().provision(service, scope, class).await?)
    }

    /// Revokes a key. Takes effect on the next call that presents it.
    pub async fn revoke_key(&self, id: ApiKeyId) -> Result<bool, GatewayError> {
        Ok(self.auth.registry().revoke(id).await?)
    }

    /// Subscribes a lobby client to a room's deltas.
    ///
    /// # Errors
    /// - [`RoomError::NotFound`](lobbygate_room::RoomError::NotFound) — unknown room
    /// - [`GatewayError::InvalidRoomState`] — the room is terminated
    pub async fn subscribe(
        &self,
        room: RoomId,
    ) -> Result<broadcast::Receiver<Arc<LobbyDelta>>, GatewayError> {
        let phase = self.directory.phase(room).await?;
        if phase == RoomPhase::Terminated {
            return Err(GatewayError::InvalidRoomState { room, phase });
        }
        Ok(self.broadcast.subscribe(room))
    }
}
