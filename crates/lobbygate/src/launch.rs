//! Launch URLs for external games.
//!
//! The external game learns everything it needs from the query string of
//! the URL it is opened with. Parameters already present on the base URL
//! are kept.

use lobbygate_protocol::{PlatformUserId, PlayerRole, RoomId, SessionToken};
use url::Url;

/// Query parameters appended to a game's base URL.
#[derive(Debug, Clone)]
pub struct LaunchParams<'a> {
    pub token: &'a SessionToken,
    pub room_id: RoomId,
    pub expected_players: u32,
    pub display_name: Option<&'a str>,
    pub player: Option<&'a PlatformUserId>,
    pub role: PlayerRole,
    pub streamer_mode: bool,
}

/// Builds the URL an external game is opened with.
pub fn launch_url(base: &Url, params: &LaunchParams<'_>) -> Url {
    let mut url = base.clone();
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("sessionToken", params.token.as_str())
            .append_pair("roomId", &params.room_id.0.to_string())
            .append_pair("players", &params.expected_players.to_string());
        if let Some(name) = params.display_name {
            query.append_pair("name", name);
        }
        if let Some(player) = params.player {
            query.append_pair("playerId", &player.0);
        }
        query.append_pair("role", params.role.as_str());
        if params.streamer_mode {
            query.append_pair("streamerMode", "true");
        }
    }
    url
}

/// Parses and checks a game base URL.
pub(crate) fn parse_base(raw: &str) -> Option<Url> {
    let url = Url::parse(raw).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}
