//! Runs a gateway with one development API key and one in-game demo room.
//!
//! Configuration comes from `LOBBYGATE_*` variables and log filtering from
//! `RUST_LOG` (default `info`).

use lobbygate::prelude::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server = GatewayServer::builder()
        .config(GatewayConfig::from_env()?)
        .build()
        .await?;
    let lobby = server.lobby();

    let (key_id, raw_key) = lobby
        .provision_key("dev-game", Permission::ALL, RateLimitClass::Standard)
        .await?;
    tracing::info!(key_id = %key_id, "development api key provisioned");
    // The raw key is shown once, on stdout only.
    println!("api key: {}", raw_key.expose());

    let (room, _code) = lobby.open_room("demo", 2).await?;
    lobby.start_game(room).await?;
    let launch = lobby
        .launch(
            room,
            LaunchRequest {
                player: Some(PlatformUserId::new("demo-player")),
                display_name: Some("Demo Player".into()),
                ..LaunchRequest::default()
            },
        )
        .await?;
    println!("launch url: {}", launch.url);

    tracing::info!(addr = %server.local_addr()?, "starting gateway");
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
