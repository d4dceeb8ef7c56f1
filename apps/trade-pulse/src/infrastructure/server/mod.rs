//! Hub API Server
//!
//! HTTP server exposing the subscriber WebSocket endpoint and the publish
//! endpoint on one port.
//!
//! # Endpoints
//!
//! - `GET /markethub` - WebSocket upgrade; streams hub frames to the client
//! - `POST /api/market/update` - Publish one market event to every subscriber

mod hub;
mod publish;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::PublishService;
use crate::infrastructure::broadcast::SharedBroadcastHub;
use crate::infrastructure::codec::JsonCodec;

pub use publish::{ApiError, PublishResponse};

/// Path of the subscriber WebSocket endpoint.
pub const MARKET_HUB_PATH: &str = "/markethub";

/// Path of the publish endpoint.
pub const PUBLISH_PATH: &str = "/api/market/update";

/// Lower bound on the keep-alive ping interval.
const MIN_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(100);

// =============================================================================
// Server State
// =============================================================================

/// Shared state for the API server.
pub struct AppState {
    hub: SharedBroadcastHub,
    publisher: PublishService,
    codec: JsonCodec,
    keepalive_interval: Duration,
    shutdown: CancellationToken,
}

impl AppState {
    /// Create server state around an existing hub.
    ///
    /// `shutdown` stops the server and closes every open subscriber socket.
    #[must_use]
    pub fn new(
        hub: SharedBroadcastHub,
        keepalive_interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            publisher: PublishService::new(hub.clone()),
            hub,
            codec: JsonCodec::new(),
            keepalive_interval: keepalive_interval.max(MIN_KEEPALIVE_INTERVAL),
            shutdown,
        }
    }

    /// The hub this server fans out through.
    #[must_use]
    pub const fn hub(&self) -> &SharedBroadcastHub {
        &self.hub
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("hub", &self.hub)
            .field("keepalive_interval", &self.keepalive_interval)
            .finish_non_exhaustive()
    }
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(MARKET_HUB_PATH, get(hub::ws_handler))
        .route(PUBLISH_PATH, post(publish::publish_handler))
        .with_state(state)
}

// =============================================================================
// API Server
// =============================================================================

/// Hub API HTTP server.
#[derive(Debug)]
pub struct ApiServer {
    port: u16,
    state: Arc<AppState>,
}

impl ApiServer {
    /// Create a new API server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<AppState>) -> Self {
        Self { port, state }
    }

    /// Bind and run the server until the state's shutdown token fires.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "API server listening");
        serve(listener, self.state).await
    }
}

/// Serve the API on an already bound listener until shutdown.
///
/// # Errors
///
/// Returns `ServerError::ServerFailed` if the HTTP server fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<(), ServerError> {
    let shutdown = state.shutdown.clone();

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

    tracing::info!("API server stopped");
    Ok(())
}

// =============================================================================
// Errors
// =============================================================================

/// API server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
