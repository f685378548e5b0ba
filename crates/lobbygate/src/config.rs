//! Gateway configuration.
//!
//! Every knob has a default. [`GatewayConfig::from_env`] overrides them
//! from `LOBBYGATE_*` variables: an unset variable keeps the default, an
//! unparsable one is a [`ConfigError`].

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use lobbygate_gateway::{RateLimitPolicy, RateLimitRule};
use lobbygate_room::SyncConfig;
use lobbygate_session::SessionConfig;
use lobbygate_sweep::SweepConfig;

/// A configuration value could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("game base url {0:?} is not an absolute http(s) url")]
    GameBaseUrl(String),
}

/// Everything needed to run a gateway.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Default: `127.0.0.1:8080`.
    pub bind_addr: SocketAddr,

    /// Where external games are launched. Session parameters are appended
    /// as query parameters. Default: `http://localhost:3000/play`.
    pub game_base_url: String,

    /// Upper bound on one HTTP request. Default: 10 seconds.
    pub request_timeout: Duration,

    /// Audit records kept in memory. Default: 100 000.
    pub usage_retention: usize,

    pub session: SessionConfig,
    pub rate_limits: RateLimitPolicy,
    pub sweep: SweepConfig,
    pub sync: SyncConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            game_base_url: "http://localhost:3000/play".to_string(),
            request_timeout: Duration::from_secs(10),
            usage_retention: 100_000,
            session: SessionConfig::default(),
            rate_limits: RateLimitPolicy::default(),
            sweep: SweepConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Loads the configuration from the process environment.
    ///
    /// | Variable | Field |
    /// |---|---|
    /// | `LOBBYGATE_BIND_ADDR` | `bind_addr` |
    /// | `LOBBYGATE_GAME_BASE_URL` | `game_base_url` |
    /// | `LOBBYGATE_REQUEST_TIMEOUT_SECS` | `request_timeout` |
    /// | `LOBBYGATE_USAGE_RETENTION` | `usage_retention` |
    /// | `LOBBYGATE_SESSION_TTL_SECS` | `session.default_ttl` |
    /// | `LOBBYGATE_LOCK_TIMEOUT_MS` | `session.lock_timeout`, `sync.lock_timeout` |
    /// | `LOBBYGATE_RATE_STANDARD_PER_MIN` | `rate_limits.standard` |
    /// | `LOBBYGATE_RATE_ELEVATED_PER_MIN` | `rate_limits.elevated` |
    /// | `LOBBYGATE_SWEEP_INTERVAL_SECS` | `sweep.interval` |
    /// | `LOBBYGATE_MAX_PAYLOAD_BYTES` | `sync.max_payload_bytes` |
    /// | `LOBBYGATE_MAX_EVENT_KEYS` | `session.max_event_keys` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env) but reads variables through
    /// `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(addr) = parse(&lookup, "LOBBYGATE_BIND_ADDR")? {
            config.bind_addr = addr;
        }
        if let Some(url) = lookup("LOBBYGATE_GAME_BASE_URL") {
            config.game_base_url = url;
        }
        if let Some(secs) = parse(&lookup, "LOBBYGATE_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = parse(&lookup, "LOBBYGATE_USAGE_RETENTION")? {
            config.usage_retention = n;
        }
        if let Some(secs) = parse(&lookup, "LOBBYGATE_SESSION_TTL_SECS")? {
            config.session.default_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = parse(&lookup, "LOBBYGATE_LOCK_TIMEOUT_MS")? {
            config.session.lock_timeout = Duration::from_millis(ms);
            config.sync.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(quota) = parse(&lookup, "LOBBYGATE_RATE_STANDARD_PER_MIN")? {
            config.rate_limits.standard = Some(RateLimitRule::per_minute(quota));
        }
        if let Some(quota) = parse(&lookup, "LOBBYGATE_RATE_ELEVATED_PER_MIN")? {
            config.rate_limits.elevated = Some(RateLimitRule::per_minute(quota));
        }
        if let Some(secs) = parse(&lookup, "LOBBYGATE_SWEEP_INTERVAL_SECS")? {
            config.sweep.interval = Duration::from_secs(secs);
        }
        if let Some(bytes) = parse(&lookup, "LOBBYGATE_MAX_PAYLOAD_BYTES")? {
            config.sync.max_payload_bytes = bytes;
        }
        if let Some(n) = parse(&lookup, "LOBBYGATE_MAX_EVENT_KEYS")? {
            config.session.max_event_keys = n;
        }

        config.sweep = config.sweep.validated();
        Ok(config)
    }
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::Invalid {
            var,
            value,
            reason: e.to_string(),
        })
}
