//! # lobbygate
//!
//! Integration gateway between a multiplayer lobby and external game
//! servers.
//!
//! The lobby never hands a room code to an external game. When a room goes
//! in game it issues an opaque session token per player and launches the
//! game with it; the game then calls the gateway with its API key and that
//! token to validate players, sync state, report player status, and emit
//! events. Lobby clients watch the results over a WebSocket subscription.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use lobbygate::prelude::*;
//!
//! # async fn run() -> Result<(), GatewayError> {
//! let server = GatewayServer::builder()
//!     .config(GatewayConfig::from_env()?)
//!     .build()
//!     .await?;
//!
//! let lobby = server.lobby();
//! let (room, _code) = lobby.open_room("trivia", 4).await?;
//! lobby.start_game(room).await?;
//! let launch = lobby.launch(room, LaunchRequest::default()).await?;
//! println!("{}", launch.url);
//!
//! server.run().await
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! lobbygate (HTTP, WebSocket, Lobby facade)   ← this crate
//!     ↓
//! lobbygate-room (directory, state store, synchronizer, fan-out)
//!     ↓
//! lobbygate-session / lobbygate-gateway (tokens, keys, rate limits)
//!     ↓
//! lobbygate-protocol / lobbygate-sweep
//! ```

mod api_key;
mod config;
mod error;
mod launch;
mod lobby;
mod routes;
mod server;
mod ws;

pub use api_key::{API_KEY_HEADER, PresentedKey};
pub use config::{ConfigError, GatewayConfig};
pub use error::GatewayError;
pub use launch::{LaunchParams, launch_url};
pub use lobby::{Launch, LaunchRequest, Lobby};
pub use routes::router;
pub use server::{GatewayServer, GatewayServerBuilder};

/// Convenience re-exports for running a gateway.
pub mod prelude {
    pub use crate::{
        GatewayConfig, GatewayError, GatewayServer, Launch, LaunchRequest, Lobby,
    };
    pub use lobbygate_gateway::RateLimitClass;
    pub use lobbygate_protocol::{Permission, PlatformUserId, PlayerRole, RoomId};
}
