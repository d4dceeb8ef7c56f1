//! Health Check and Metrics Endpoint
//!
//! HTTP endpoint for health checks, hub status reporting, and Prometheus metrics.
//! Used by container orchestrators, load balancers, and monitoring systems.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns JSON health status
//! - `GET /healthz` - Kubernetes liveness probe (simple OK)
//! - `GET /readyz` - Kubernetes readiness probe (not ready once shutting down)
//! - `GET /metrics` - Prometheus metrics in text format

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::broadcast::{BroadcastStats, SharedBroadcastHub};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Overall status: "healthy" or "unhealthy".
    pub status: HealthStatus,
    /// Hub version.
    pub version: String,
    /// Server uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Hub fan-out statistics.
    pub hub: HubStatus,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Accepting publishes and subscribers.
    Healthy,
    /// Shutting down.
    Unhealthy,
}

/// Hub statistics.
#[derive(Debug, Clone, Serialize)]
pub struct HubStatus {
    /// Registered subscribers.
    pub subscribers: usize,
    /// Events published since startup.
    pub events_published: u64,
    /// Per-subscriber deliveries since startup.
    pub deliveries: u64,
    /// Per-subscriber deliveries dropped since startup.
    pub dropped: u64,
}

impl From<BroadcastStats> for HubStatus {
    fn from(stats: BroadcastStats) -> Self {
        Self {
            subscribers: stats.subscribers,
            events_published: stats.events_published,
            deliveries: stats.deliveries,
            dropped: stats.dropped,
        }
    }
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    hub: SharedBroadcastHub,
    shutdown: CancellationToken,
}

impl HealthServerState {
    /// Create new health server state.
    ///
    /// The hub reports unhealthy once `shutdown` is cancelled.
    #[must_use]
    pub fn new(version: String, hub: SharedBroadcastHub, shutdown: CancellationToken) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            hub,
            shutdown,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Run the health server until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| HealthServerError::BindFailed(self.port, e.to_string()))?;

        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, health_router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| HealthServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

/// Build the health router.
pub fn health_router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(liveness_handler))
        .route("/readyz", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

async fn health_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let response = build_health_response(&state);
    let status_code = match response.status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (status_code, Json(response))
}

async fn liveness_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

async fn readiness_handler(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    if state.shutdown.is_cancelled() {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    } else {
        (StatusCode::OK, "READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    get_metrics_handle().map_or_else(
        || {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                [("content-type", "text/plain")],
                "Metrics not initialized".to_string(),
            )
        },
        |handle| {
            let body = handle.render();
            (
                StatusCode::OK,
                [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
                body,
            )
        },
    )
}

fn build_health_response(state: &HealthServerState) -> HealthResponse {
    HealthResponse {
        status: determine_health_status(state.shutdown.is_cancelled()),
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        hub: state.hub.stats().into(),
    }
}

const fn determine_health_status(shutting_down: bool) -> HealthStatus {
    if shutting_down {
        HealthStatus::Unhealthy
    } else {
        HealthStatus::Healthy
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health server errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::domain::market::MarketEvent;
    use crate::infrastructure::broadcast::BroadcastHub;

    fn state(shutdown: CancellationToken) -> (SharedBroadcastHub, Arc<HealthServerState>) {
        let hub = Arc::new(BroadcastHub::with_defaults());
        let state = Arc::new(HealthServerState::new(
            "0.1.0".to_string(),
            hub.clone(),
            shutdown,
        ));
        (hub, state)
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn health_status_serialization() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::Healthy).unwrap(),
            "\"healthy\""
        );
        assert_eq!(
            serde_json::to_string(&HealthStatus::Unhealthy).unwrap(),
            "\"unhealthy\""
        );
    }

    #[test]
    fn determine_status() {
        assert_eq!(determine_health_status(false), HealthStatus::Healthy);
        assert_eq!(determine_health_status(true), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn health_reports_hub_stats() {
        let (hub, state) = state(CancellationToken::new());
        let _subscriber = hub.register();
        hub.publish(MarketEvent::new("AAPL"));

        let (status, body) = get(health_router(state), "/health").await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["hub"]["subscribers"], 1);
        assert_eq!(json["hub"]["events_published"], 1);
        assert_eq!(json["hub"]["deliveries"], 1);
    }

    #[tokio::test]
    async fn not_ready_after_shutdown() {
        let shutdown = CancellationToken::new();
        let (_hub, state) = state(shutdown.clone());

        let (status, body) = get(health_router(state.clone()), "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "READY");

        shutdown.cancel();
        let (status, body) = get(health_router(state.clone()), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body, "NOT READY");

        let (status, _) = get(health_router(state), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn liveness_is_always_ok() {
        let (_hub, state) = state(CancellationToken::new());
        let (status, body) = get(health_router(state), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");
    }
}
