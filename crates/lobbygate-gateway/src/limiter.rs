//! Per-key fixed-window rate limiting.
//!
//! Each API key gets one counter per window. A window opens at the first
//! call after the previous one elapsed and lasts `rule.window`; once
//! `rule.quota` calls were admitted in it, further calls are rejected until
//! it closes.
//!
//! ```text
//!  window 1 (60s)            window 2
//! |x x x x … x|  rejected  |x x …
//! ^first call  ^quota hit   ^first call after window 1 ended
//! ```
//!
//! Check and increment happen under one lock, so concurrent admits for the
//! same key never over- or under-count.

use std::collections::HashMap;
use std::time::Duration;

use futures_util::future::BoxFuture;
use lobbygate_protocol::{ApiKeyId, lock_within};
use lobbygate_sweep::{SweepError, SweepTarget};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::{AuthError, RateLimitClass};

/// Quota and window length for one rate-limit class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRule {
    pub quota: u32,
    pub window: Duration,
}

impl RateLimitRule {
    pub const fn per_minute(quota: u32) -> Self {
        Self {
            quota,
            window: Duration::from_secs(60),
        }
    }
}

/// Maps each class to its rule. A class with no rule is unlimited.
#[derive(Debug, Clone)]
pub struct RateLimitPolicy {
    pub standard: Option<RateLimitRule>,
    pub elevated: Option<RateLimitRule>,
    pub trusted: Option<RateLimitRule>,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            standard: Some(RateLimitRule::per_minute(600)),
            elevated: Some(RateLimitRule::per_minute(3000)),
            trusted: None,
        }
    }
}

impl RateLimitPolicy {
    pub fn rule(&self, class: RateLimitClass) -> Option<RateLimitRule> {
        match class {
            RateLimitClass::Standard => self.standard,
            RateLimitClass::Elevated => self.elevated,
            RateLimitClass::Trusted => self.trusted,
        }
    }
}

/// Outcome of a successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    /// Calls left in the current window. `None` when unlimited.
    pub remaining: Option<u32>,
}

#[derive(Debug)]
struct Window {
    started: Instant,
    length: Duration,
    count: u32,
}

impl Window {
    fn ends_at(&self) -> Instant {
        self.started + self.length
    }
}

/// Fixed-window counters keyed by API key.
pub struct RateLimiter {
    policy: RateLimitPolicy,
    windows: Mutex<HashMap<ApiKeyId, Window>>,
    lock_timeout: Duration,
}

impl RateLimiter {
    pub fn new(policy: RateLimitPolicy, lock_timeout: Duration) -> Self {
        Self {
            policy,
            windows: Mutex::new(HashMap::new()),
            lock_timeout,
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Counts one call for `key` against its class quota.
    ///
    /// Rejected calls are not counted.
    ///
    /// # Errors
    /// - [`AuthError::RateLimitExceeded`] — quota used up; `retry_after` is
    ///   the time until the window closes
    /// - [`AuthError::Unavailable`] — the counter lock was not acquired in time
    pub async fn admit(&self, key: ApiKeyId, class: RateLimitClass) -> Result<Admission, AuthError> {
        let Some(rule) = self.policy.rule(class) else {
            return Ok(Admission { remaining: None });
        };

        let now = Instant::now();
        let mut windows = lock_within(&self.windows, self.lock_timeout).await?;
        let window = windows.entry(key).or_insert(Window {
            started: now,
            length: rule.window,
            count: 0,
        });

        if now >= window.ends_at() {
            window.started = now;
            window.length = rule.window;
            window.count = 0;
        }

        if window.count >= rule.quota {
            let retry_after = window.ends_at().saturating_duration_since(now);
            tracing::warn!(key_id = %key, quota = rule.quota, ?retry_after, "rate limit exceeded");
            return Err(AuthError::RateLimitExceeded { retry_after });
        }

        window.count += 1;
        Ok(Admission {
            remaining: Some(rule.quota - window.count),
        })
    }

    /// Drops windows that have already closed. Returns how many.
    pub async fn prune_idle(&self) -> Result<usize, AuthError> {
        let now = Instant::now();
        let mut windows = lock_within(&self.windows, self.lock_timeout).await?;
        let before = windows.len();
        windows.retain(|_, w| now < w.ends_at());
        Ok(before - windows.len())
    }

    /// Number of keys with an open window.
    pub async fn tracked(&self) -> Result<usize, AuthError> {
        Ok(lock_within(&self.windows, self.lock_timeout).await?.len())
    }
}

impl SweepTarget for RateLimiter {
    fn name(&self) -> &'static str {
        "rate-windows"
    }

    fn sweep(&self) -> BoxFuture<'_, Result<usize, SweepError>> {
        Box::pin(async move {
            self.prune_idle()
                .await
                .map_err(|e| SweepError::Unavailable(e.to_string()))
        })
    }
}
