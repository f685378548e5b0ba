//! Admission of inbound gateway calls.
//!
//! Every call from an external game server passes two independent gates:
//!
//! ```text
//! raw key ──→ authenticate(required permission) ──→ AuthorizedCaller
//!                  │  identity + scope                    │
//!                  │                                      ▼
//!                  │                              admit(endpoint)
//!                  │                                quota
//!                  ▼                                      ▼
//!             UsageLedger ◄──────────────────────── UsageLedger
//! ```
//!
//! Authentication reads the key registry on every call and never consults
//! the limiter, so a revoked key is rejected on its very next call no
//! matter how much quota it had left. Every outcome of either gate is
//! appended to the ledger, including calls that presented no key and calls
//! that failed because a store was unavailable.

use std::collections::BTreeSet;
use std::sync::Arc;

use lobbygate_protocol::{ApiKeyId, Permission};

use crate::{
    Admission, ApiKeyRegistry, AuthError, RateLimitClass, RateLimiter, RawApiKey, UsageLedger,
    UsageOutcome,
};

/// A caller whose key was found, active, and in scope.
#[derive(Debug, Clone)]
pub struct AuthorizedCaller {
    pub key_id: ApiKeyId,
    pub service: String,
    pub scope: BTreeSet<Permission>,
    pub class: RateLimitClass,
}

/// Authenticates API keys and enforces per-key quotas.
#[derive(Clone)]
pub struct GatewayAuthenticator {
    registry: Arc<ApiKeyRegistry>,
    limiter: Arc<RateLimiter>,
    ledger: Arc<UsageLedger>,
}

impl GatewayAuthenticator {
    pub fn new(
        registry: Arc<ApiKeyRegistry>,
        limiter: Arc<RateLimiter>,
        ledger: Arc<UsageLedger>,
    ) -> Self {
        Self {
            registry,
            limiter,
            ledger,
        }
    }

    pub fn registry(&self) -> &Arc<ApiKeyRegistry> {
        &self.registry
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn ledger(&self) -> &Arc<UsageLedger> {
        &self.ledger
    }

    /// Hashes `raw`, looks it up, and checks that its scope includes
    /// `required`. `None` means the request carried no key at all.
    ///
    /// # Errors
    /// - [`AuthError::InvalidApiKey`] — missing, unknown, or revoked key
    /// - [`AuthError::PermissionDenied`] — `required` is outside the scope
    /// - [`AuthError::Unavailable`] — the registry lock was not acquired
    pub async fn authenticate(
        &self,
        raw: Option<&RawApiKey>,
        required: Permission,
        endpoint: &'static str,
    ) -> Result<AuthorizedCaller, AuthError> {
        let Some(raw) = raw else {
            tracing::debug!(endpoint, "request without api key rejected");
            self.ledger.append(None, endpoint, UsageOutcome::Denied);
            return Err(AuthError::InvalidApiKey);
        };

        let key = match self.registry.lookup(&raw.hash()).await {
            Ok(key) => key,
            Err((key_id, err)) => {
                if matches!(err, AuthError::InvalidApiKey) {
                    tracing::debug!(key_id = ?key_id, endpoint, "api key rejected");
                    self.ledger.append(key_id, endpoint, UsageOutcome::Denied);
                } else {
                    tracing::warn!(key_id = ?key_id, endpoint, error = %err, "api key lookup failed");
                    self.ledger.append(key_id, endpoint, UsageOutcome::Failed);
                }
                return Err(err);
            }
        };

        if !key.allows(required) {
            tracing::warn!(key_id = %key.id, service = %key.service, %required, endpoint, "permission denied");
            self.ledger.append(Some(key.id), endpoint, UsageOutcome::Denied);
            return Err(AuthError::PermissionDenied(required));
        }

        Ok(AuthorizedCaller {
            key_id: key.id,
            service: key.service,
            scope: key.scope,
            class: key.class,
        })
    }

    /// Counts the call against the caller's quota and records the outcome.
    ///
    /// # Errors
    /// - [`AuthError::RateLimitExceeded`] — quota used up for this window
    /// - [`AuthError::Unavailable`] — the counter lock was not acquired
    pub async fn admit(
        &self,
        caller: &AuthorizedCaller,
        endpoint: &'static str,
    ) -> Result<Admission, AuthError> {
        match self.limiter.admit(caller.key_id, caller.class).await {
            Ok(admission) => {
                self.ledger
                    .append(Some(caller.key_id), endpoint, UsageOutcome::Accepted);
                Ok(admission)
            }
            Err(err @ AuthError::RateLimitExceeded { .. }) => {
                self.ledger
                    .append(Some(caller.key_id), endpoint, UsageOutcome::RateLimited);
                Err(err)
            }
            Err(err) => {
                tracing::warn!(key_id = %caller.key_id, endpoint, error = %err, "admission failed");
                self.ledger
                    .append(Some(caller.key_id), endpoint, UsageOutcome::Failed);
                Err(err)
            }
        }
    }

    /// Authenticates and admits in one step.
    pub async fn check(
        &self,
        raw: Option<&RawApiKey>,
        required: Permission,
        endpoint: &'static str,
    ) -> Result<AuthorizedCaller, AuthError> {
        let caller = self.authenticate(raw, required, endpoint).await?;
        self.admit(&caller, endpoint).await?;
        Ok(caller)
    }

    /// Re-checks an already authenticated caller against the registry.
    ///
    /// Used right before a mutation so that a key revoked between
    /// admission and the write does not get the write through.
    pub async fn require(
        &self,
        caller: &AuthorizedCaller,
        required: Permission,
    ) -> Result<(), AuthError> {
        let key = self
            .registry
            .get(caller.key_id)
            .await?
            .filter(|k| k.is_active())
            .ok_or(AuthError::InvalidApiKey)?;

        if !key.allows(required) {
            return Err(AuthError::PermissionDenied(required));
        }
        Ok(())
    }
}
