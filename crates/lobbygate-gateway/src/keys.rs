//! The API key registry.
//!
//! Keys are provisioned out of band (an administrative action) and are
//! long-lived. The registry never holds a raw key: it is hashed with
//! SHA-256 the moment it is generated or presented, and only the hex
//! digest is stored and compared.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::time::Duration;

use lobbygate_protocol::{ApiKeyId, Permission, lock_within};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, MutexGuard};

use crate::AuthError;

/// Prefix of every generated raw key, so leaked keys are recognisable.
pub const RAW_KEY_PREFIX: &str = "lgk_";

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

/// An API key exactly as the caller presented it.
///
/// `Debug` is redacted; there is no `Display` and no `Serialize`.
#[derive(Clone, PartialEq, Eq)]
pub struct RawApiKey(String);

impl RawApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Generates a fresh key: prefix plus 256 random bits in hex.
    pub fn generate() -> Self {
        let bytes: [u8; 32] = rand::rng().random();
        Self(format!("{RAW_KEY_PREFIX}{}", hex::encode(bytes)))
    }

    /// The plaintext. Only for handing the key to its owner once.
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn hash(&self) -> KeyHash {
        KeyHash::of(&self.0)
    }
}

impl fmt::Debug for RawApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RawApiKey(<redacted>)")
    }
}

/// Lowercase hex SHA-256 digest of a raw key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyHash(String);

impl KeyHash {
    pub fn of(raw: &str) -> Self {
        Self(hex::encode(Sha256::digest(raw.as_bytes())))
    }

    /// Wraps a digest computed elsewhere (out-of-band provisioning).
    pub fn from_hex(digest: impl Into<String>) -> Self {
        Self(digest.into().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// Key records
// ---------------------------------------------------------------------------

/// Which rate-limit rule applies to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitClass {
    /// Ordinary third-party game servers.
    Standard,
    /// High-traffic partners.
    Elevated,
    /// First-party services. Unlimited unless the policy says otherwise.
    Trusted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    Active,
    Revoked,
}

/// A provisioned API key.
#[derive(Debug, Clone)]
pub struct ApiKey {
    pub id: ApiKeyId,
    pub secret_hash: KeyHash,
    /// Name of the service the key belongs to.
    pub service: String,
    pub scope: BTreeSet<Permission>,
    pub class: RateLimitClass,
    pub status: KeyStatus,
}

impl ApiKey {
    pub fn allows(&self, permission: Permission) -> bool {
        self.scope.contains(&permission)
    }

    pub fn is_active(&self) -> bool {
        self.status == KeyStatus::Active
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
pub(crate) struct Keys {
    by_hash: HashMap<KeyHash, ApiKeyId>,
    records: HashMap<ApiKeyId, ApiKey>,
    next_id: u64,
}

/// Stores API keys by the hash of their secret.
pub struct ApiKeyRegistry {
    keys: Mutex<Keys>,
    lock_timeout: Duration,
}

impl ApiKeyRegistry {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            keys: Mutex::new(Keys {
                next_id: 1,
                ..Default::default()
            }),
            lock_timeout,
        }
    }

    /// Acquires the key table within `lock_timeout`.
    pub(crate) async fn lock(&self) -> Result<MutexGuard<'_, Keys>, AuthError> {
        Ok(lock_within(&self.keys, self.lock_timeout).await?)
    }

    /// Generates a new key for `service` and returns it.
    ///
    /// This is the only time the raw key exists on the server.
    pub async fn provision(
        &self,
        service: impl Into<String>,
        scope: impl IntoIterator<Item = Permission>,
        class: RateLimitClass,
    ) -> Result<(ApiKeyId, RawApiKey), AuthError> {
        let raw = RawApiKey::generate();
        let id = self.register_hashed(service, raw.hash(), scope, class).await?;
        Ok((id, raw))
    }

    /// Registers a key whose hash was computed elsewhere.
    ///
    /// # Errors
    /// - [`AuthError::DuplicateKey`] — the hash is already registered
    pub async fn register_hashed(
        &self,
        service: impl Into<String>,
        secret_hash: KeyHash,
        scope: impl IntoIterator<Item = Permission>,
        class: RateLimitClass,
    ) -> Result<ApiKeyId, AuthError> {
        let mut keys = self.lock().await?;
        if keys.by_hash.contains_key(&secret_hash) {
            return Err(AuthError::DuplicateKey);
        }

        let id = ApiKeyId(keys.next_id);
        keys.next_id += 1;

        let record = ApiKey {
            id,
            secret_hash: secret_hash.clone(),
            service: service.into(),
            scope: scope.into_iter().collect(),
            class,
            status: KeyStatus::Active,
        };
        tracing::info!(key_id = %id, service = %record.service, class = ?class, "api key registered");

        keys.by_hash.insert(secret_hash, id);
        keys.records.insert(id, record);
        Ok(id)
    }

    /// Finds the active key with this hash.
    ///
    /// Unknown and revoked keys both yield [`AuthError::InvalidApiKey`].
    /// The id of a revoked key is still returned alongside so the attempt
    /// can be audited.
    pub async fn lookup(&self, hash: &KeyHash) -> Result<ApiKey, (Option<ApiKeyId>, AuthError)> {
        let keys = self.lock().await.map_err(|e| (None, e))?;

        let record = keys
            .by_hash
            .get(hash)
            .and_then(|id| keys.records.get(id))
            .ok_or((None, AuthError::InvalidApiKey))?;

        if !record.is_active() {
            return Err((Some(record.id), AuthError::InvalidApiKey));
        }
        Ok(record.clone())
    }

    /// Current record for a key id, whatever its status.
    pub async fn get(&self, id: ApiKeyId) -> Result<Option<ApiKey>, AuthError> {
        let keys = self.lock().await?;
        Ok(keys.records.get(&id).cloned())
    }

    /// Revokes a key. Effective for the very next request.
    ///
    /// Returns `false` if the key was unknown or already revoked.
    pub async fn revoke(&self, id: ApiKeyId) -> Result<bool, AuthError> {
        let mut keys = self.lock().await?;
        let Some(record) = keys.records.get_mut(&id) else {
            return Ok(false);
        };
        if record.status == KeyStatus::Revoked {
            return Ok(false);
        }
        record.status = KeyStatus::Revoked;
        tracing::info!(key_id = %id, service = %record.service, "api key revoked");
        Ok(true)
    }

    pub async fn len(&self) -> Result<usize, AuthError> {
        Ok(self.lock().await?.records.len())
    }
}
