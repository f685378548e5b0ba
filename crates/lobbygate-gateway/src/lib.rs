//! API key authentication and admission control for lobbygate.
//!
//! External game servers identify themselves with API keys. This crate
//! decides, for every inbound call, whether the key is genuine, whether it
//! may do what it asks, and whether it still has quota, and it records the
//! answer.
//!
//! - [`ApiKeyRegistry`]: provisioned keys, stored by SHA-256 of the secret
//! - [`RateLimiter`]: fixed-window counters per key
//! - [`UsageLedger`]: append-only audit trail
//! - [`GatewayAuthenticator`]: the two gates (`authenticate`, `admit`) in front
//!   of every gateway endpoint

mod authenticator;
mod error;
mod keys;
mod ledger;
mod limiter;

pub use authenticator::{AuthorizedCaller, GatewayAuthenticator};
pub use error::AuthError;
pub use keys::{ApiKey, ApiKeyRegistry, KeyHash, KeyStatus, RAW_KEY_PREFIX, RateLimitClass, RawApiKey};
pub use ledger::{UsageLedger, UsageOutcome, UsageRecord};
pub use limiter::{Admission, RateLimitPolicy, RateLimitRule, RateLimiter};
