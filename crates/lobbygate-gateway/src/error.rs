//! Error types for the gateway admission layer.

use std::time::Duration;

use lobbygate_protocol::{LockTimeout, Permission};

/// Errors raised while authenticating and admitting external callers.
///
/// None of these say anything about rooms or sessions: a caller that fails
/// here learns nothing about whether the resource it asked for exists.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The key is missing, unknown, or revoked.
    #[error("invalid api key")]
    InvalidApiKey,

    /// The key is valid but its scope lacks the required permission.
    #[error("api key lacks permission {0}")]
    PermissionDenied(Permission),

    /// The key used up its quota for the current window.
    #[error("rate limit exceeded, retry in {}s", retry_after.as_secs().max(1))]
    RateLimitExceeded { retry_after: Duration },

    /// A key with the same secret hash is already registered.
    #[error("api key already registered")]
    DuplicateKey,

    /// A key or limiter store could not be reached in bounded time.
    #[error("gateway store unavailable: {0}")]
    Unavailable(#[from] LockTimeout),
}
