//! Room-layer configuration.

use std::time::Duration;

/// Limits for room state synchronization.
///
/// ```ignore
/// let config = SyncConfig {
///     max_payload_bytes: 64 * 1024,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Largest serialized state payload or event body accepted, in bytes.
    /// Default: 256 KiB.
    pub max_payload_bytes: usize,

    /// Events kept per room for late lobby subscribers. Oldest are
    /// dropped first. Default: 128.
    pub event_history: usize,

    /// Capacity of each room's fan-out channel. Subscribers that fall
    /// further behind skip messages. Default: 256.
    pub broadcast_capacity: usize,

    /// Deadline for acquiring the room directory and state locks.
    /// Default: 2 seconds.
    pub lock_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 256 * 1024,
            event_history: 128,
            broadcast_capacity: 256,
            lock_timeout: Duration::from_secs(2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sync_config() {
        let config = SyncConfig::default();
        assert_eq!(config.max_payload_bytes, 262_144);
        assert_eq!(config.event_history, 128);
        assert_eq!(config.broadcast_capacity, 256);
    }
}
