//! SSE server
//!
//! Binds the listener, starts the hub and the upstream relay, and serves
//! the router until shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

use crate::error::Result;
use crate::hub::{Hub, HubConfig, HubError, LifecycleHooks, SseMessage};
use crate::server::config::ServerConfig;
use crate::server::relay;
use crate::server::routes;

/// Relay endpoints held until the server starts
struct PendingRelay {
    upstream: mpsc::Receiver<SseMessage>,
    gate: watch::Receiver<bool>,
}

/// SSE server
///
/// Serves `GET /subscribe[/<namespace>]` as an event stream and `GET /health`
/// as a plain-text status line. Messages sent through [`SseServer::publisher`]
/// reach the hub only while someone is subscribed.
pub struct SseServer {
    config: Arc<ServerConfig>,
    hub: Hub,
    upstream: mpsc::Sender<SseMessage>,
    pending_relay: Mutex<Option<PendingRelay>>,
}

impl SseServer {
    /// Create a new server with the given configuration
    pub fn new(config: ServerConfig) -> Self {
        Self::with_hub_config(config, HubConfig::default(), LifecycleHooks::new())
    }

    /// Create a new server with custom hub configuration and extra hooks
    ///
    /// `hooks` run after the server's own upstream gating hooks.
    pub fn with_hub_config(
        config: ServerConfig,
        hub_config: HubConfig,
        hooks: LifecycleHooks,
    ) -> Self {
        let (gate_tx, gate_rx) = watch::channel(false);
        let (upstream_tx, upstream_rx) = mpsc::channel(config.upstream_capacity.max(1));

        let hub = Hub::new(hub_config, relay::gate_hooks(gate_tx).and_then(hooks));

        Self {
            config: Arc::new(config),
            hub,
            upstream: upstream_tx,
            pending_relay: Mutex::new(Some(PendingRelay {
                upstream: upstream_rx,
                gate: gate_rx,
            })),
        }
    }

    /// Get a reference to the hub
    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Channel for publishing messages through the gated relay
    pub fn publisher(&self) -> mpsc::Sender<SseMessage> {
        self.upstream.clone()
    }

    /// Publish directly to the hub, bypassing the relay
    pub async fn broadcast(&self, message: SseMessage) -> std::result::Result<(), HubError> {
        self.hub.broadcast(message).await
    }

    /// Current number of live subscribers
    pub fn active_connection_count(&self) -> usize {
        self.hub.active_connection_count()
    }

    /// Router serving this server's hub, for mounting elsewhere
    pub fn router(&self) -> Router {
        routes::build_router(self.hub.clone(), &self.config)
    }

    /// Start the hub and the upstream relay
    ///
    /// Called by the run methods; calling it again is a no-op.
    pub fn start(&self) {
        self.hub.start();

        let pending = self
            .pending_relay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pending) = pending {
            relay::spawn(self.hub.clone(), pending.upstream, pending.gate);
        }
    }

    /// Run the server
    ///
    /// This method returns only if binding fails or the hub is stopped.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve_until(listener, shutdown).await
    }

    /// Serve on an already bound listener until the hub is stopped
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        self.serve_until(listener, std::future::pending()).await
    }

    /// Serve on an already bound listener with graceful shutdown
    ///
    /// Either `shutdown` resolving or [`SseServer::stop`] stops the hub,
    /// which ends every open stream; this returns once those responses
    /// have finished.
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.start();
        let addr = listener.local_addr()?;
        tracing::info!(addr = %addr, "SSE server listening");

        let hub = self.hub.clone();
        let signal = async move {
            tokio::select! {
                _ = shutdown => tracing::info!("Shutdown signal received"),
                _ = hub.stopped() => {}
            }
            hub.stop();
        };

        let app = self.router();
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(signal)
            .await?;

        self.stop().await;
        tracing::info!(addr = %addr, "SSE server stopped");
        Ok(())
    }

    /// Stop the hub; every open stream ends
    pub async fn stop(&self) {
        self.hub.shutdown().await;
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }
}

impl Drop for SseServer {
    fn drop(&mut self) {
        self.hub.stop();
    }
}
