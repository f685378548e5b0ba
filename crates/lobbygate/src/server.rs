//! `GatewayServer` builder and serve loop.
//!
//! This is the entry point for running a gateway. It ties together all the
//! layers: HTTP routes → room synchronizer → session / gateway stores, plus
//! the background cleanup scheduler.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use lobbygate_sweep::CleanupScheduler;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use crate::{GatewayConfig, GatewayError, Lobby, routes};

/// Builder for configuring and starting a gateway server.
///
/// # Example
///
/// ```rust,no_run
/// # async fn run() -> Result<(), lobbygate::GatewayError> {
/// use lobbygate::{GatewayConfig, GatewayServer};
///
/// let server = GatewayServer::builder()
///     .config(GatewayConfig::from_env()?)
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct GatewayServerBuilder {
    config: GatewayConfig,
}

impl GatewayServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: GatewayConfig::default(),
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Sets the base URL external games are launched from.
    pub fn game_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.game_base_url = url.into();
        self
    }

    /// Builds the components and binds the listener.
    pub async fn build(self) -> Result<GatewayServer, GatewayError> {
        let lobby = Arc::new(Lobby::new(self.config)?);
        let listener = TcpListener::bind(lobby.config().bind_addr).await?;
        Ok(GatewayServer { listener, lobby })
    }
}

impl Default for GatewayServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound gateway server.
///
/// Call [`run()`](Self::run) or [`run_until()`](Self::run_until) to start
/// serving.
pub struct GatewayServer {
    listener: TcpListener,
    lobby: Arc<Lobby>,
}

impl GatewayServer {
    /// Creates a new builder.
    pub fn builder() -> GatewayServerBuilder {
        GatewayServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// The lobby behind this server, for opening rooms and launching
    /// players while it serves.
    pub fn lobby(&self) -> &Arc<Lobby> {
        &self.lobby
    }

    pub fn router(&self) -> Router {
        routes::router(Arc::clone(&self.lobby))
    }

    /// Serves until the process is terminated.
    pub async fn run(self) -> Result<(), GatewayError> {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `shutdown` completes, then drains in-flight requests.
    ///
    /// The cleanup scheduler runs alongside and stops with the server.
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), GatewayError> {
        let (stop_sweeps, sweeps_stopped) = oneshot::channel::<()>();
        let scheduler = CleanupScheduler::new(self.lobby.config().sweep.clone())
            .with_target(Arc::clone(self.lobby.broker()))
            .with_target(Arc::clone(self.lobby.auth().limiter()));
        let scheduler = tokio::spawn(scheduler.run_until(async move {
            let _ = sweeps_stopped.await;
        }));

        let addr = self.local_addr()?;
        tracing::info!(%addr, "lobbygate gateway listening");

        let app = self.router();
        let served = axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown)
            .await;

        let _ = stop_sweeps.send(());
        let _ = scheduler.await;
        tracing::info!("lobbygate gateway stopped");
        Ok(served?)
    }
}
