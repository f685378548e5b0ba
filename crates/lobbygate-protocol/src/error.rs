//! Error types for the protocol layer.
//!
//! Each lobbygate crate defines its own error enum. A `ProtocolError` means
//! a request body was well-formed JSON but broke a protocol rule; it is
//! never about sessions, keys, or rooms.

use std::time::Duration;

/// Errors raised while validating gateway request bodies.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The message violates a protocol rule (empty event type, blank
    /// external player id, and so on).
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A state payload or event body is larger than the configured limit.
    #[error("payload of {size} bytes exceeds limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },
}

/// A shared lock could not be acquired before its deadline.
///
/// Every store in the workspace takes its lock through
/// [`lock_within`](crate::lock_within), so contention surfaces as this
/// error instead of an indefinite wait. Crate errors map it to their own
/// `Unavailable` variant.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("lock not acquired within {0:?}")]
pub struct LockTimeout(pub Duration);
