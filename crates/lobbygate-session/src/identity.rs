//! Player identity resolution between the platform and external games.
//!
//! External games sometimes invent their own player identifiers instead of
//! using the `playerId` handed to them at launch. The gateway never trusts
//! those identifiers directly. Instead:
//!
//! 1. On first contact, [`PlayerIdentityResolver::bind`] records the
//!    external id next to the platform user id the lobby put in the session
//!    when it issued the token.
//! 2. Every later call that names a player goes through
//!    [`PlayerIdentityResolver::resolve`], which only succeeds for that
//!    exact external id.
//!
//! The platform user id returned is always the one established at issuance.

use std::sync::Arc;

use lobbygate_protocol::{ExternalPlayerId, PlatformUserId, SessionToken};
use tokio::time::Instant;

use crate::broker::live_record;
use crate::{PlayerBinding, SessionBroker, SessionError};

/// Binds and resolves external player ids against session tokens.
#[derive(Clone)]
pub struct PlayerIdentityResolver {
    broker: Arc<SessionBroker>,
}

impl PlayerIdentityResolver {
    pub fn new(broker: Arc<SessionBroker>) -> Self {
        Self { broker }
    }

    /// Records the external id for a session on first contact.
    ///
    /// Binding the same id again is a no-op that returns the same platform
    /// user.
    ///
    /// # Errors
    /// - [`SessionError::TokenNotFound`] / [`SessionError::TokenExpired`]
    /// - [`SessionError::PlayerNotFound`] — the session has no platform
    ///   user (spectator token)
    /// - [`SessionError::IdentityMismatch`] — the session is bound to a
    ///   different external id, or another session in the room already
    ///   claimed this one
    pub async fn bind(
        &self,
        token: &SessionToken,
        external: &ExternalPlayerId,
    ) -> Result<PlatformUserId, SessionError> {
        if external.0.trim().is_empty() {
            return Err(SessionError::PlayerNotFound);
        }

        let mut store = self.broker.lock().await?;

        let room_id = {
            let record = live_record(&mut store, token)?;
            if record.platform_user_id.is_none() {
                return Err(SessionError::PlayerNotFound);
            }
            if let Some(binding) = &record.binding {
                if binding.external_player_id == *external {
                    return Ok(binding.platform_user_id.clone());
                }
                tracing::warn!(
                    room_id = %record.room_id,
                    %token,
                    bound = %binding.external_player_id,
                    presented = %external,
                    "external player id does not match binding"
                );
                return Err(SessionError::IdentityMismatch);
            }
            record.room_id
        };

        if let Some(owner) = store.external_owner(room_id, external) {
            if owner != token {
                tracing::warn!(
                    %room_id,
                    %token,
                    presented = %external,
                    "external player id already bound to another session"
                );
                return Err(SessionError::IdentityMismatch);
            }
        }

        let record = live_record(&mut store, token)?;
        let Some(platform_user_id) = record.platform_user_id.clone() else {
            return Err(SessionError::PlayerNotFound);
        };
        record.binding = Some(PlayerBinding {
            platform_user_id: platform_user_id.clone(),
            external_player_id: external.clone(),
            bound_at: Instant::now(),
        });
        store.index_external(room_id, external.clone(), token.clone());

        tracing::info!(
            %room_id,
            platform_user = %platform_user_id,
            external = %external,
            "player identity bound"
        );
        Ok(platform_user_id)
    }

    /// Maps an external id back to the session's platform user.
    ///
    /// # Errors
    /// - [`SessionError::TokenNotFound`] / [`SessionError::TokenExpired`]
    /// - [`SessionError::PlayerNotFound`] — no binding yet, or `external`
    ///   is not the bound id
    pub async fn resolve(
        &self,
        token: &SessionToken,
        external: &ExternalPlayerId,
    ) -> Result<PlatformUserId, SessionError> {
        let mut store = self.broker.lock().await?;
        let record = live_record(&mut store, token)?;

        match &record.binding {
            Some(binding) if binding.external_player_id == *external => {
                Ok(binding.platform_user_id.clone())
            }
            _ => {
                tracing::debug!(room_id = %record.room_id, presented = %external, "player not resolvable");
                Err(SessionError::PlayerNotFound)
            }
        }
    }
}
