//! Session management for lobbygate.
//!
//! This crate owns everything an opaque session token stands for:
//!
//! 1. **Issuing** — the lobby asks [`SessionBroker::issue`] for a token when
//!    a room goes in-game, and hands that token (never the room code) to
//!    the external game
//! 2. **Validation** — every gateway call resolves its token through
//!    [`SessionBroker::validate`]
//! 3. **Identity** — [`PlayerIdentityResolver`] reconciles external player
//!    ids with the platform user fixed at issuance
//! 4. **Expiry** — the broker is a sweep target for the cleanup scheduler
//!
//! # How it fits in the stack
//!
//! ```text
//! Room layer (above)     ← resolves tokens to rooms before applying writes
//!     ↕
//! Session layer (this crate)
//!     ↕
//! Protocol layer (below) ← SessionToken, RoomId, PlatformUserId
//! ```

mod broker;
mod error;
mod identity;
mod session;
mod store;

pub use broker::SessionBroker;
pub use error::SessionError;
pub use identity::PlayerIdentityResolver;
pub use session::{
    EventClaim, EventKeys, IssueRequest, PlayerBinding, RoomTicket, SessionConfig,
    SessionContext, SessionRecord, SessionStats,
};
pub use store::TokenStore;
