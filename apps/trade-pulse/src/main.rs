//! TradePulse Hub Binary
//!
//! Starts the market event hub: subscriber WebSocket endpoint, publish
//! endpoint and health server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin trade-pulse
//! ```
//!
//! # Environment Variables
//!
//! - `PULSE_API_PORT`: Hub WebSocket and publish endpoint port (default: 5080)
//! - `PULSE_HEALTH_PORT`: Health check HTTP port (default: 8082)
//! - `PULSE_SUBSCRIBER_QUEUE_CAPACITY`: Per-subscriber queue size (default: 1024)
//! - `PULSE_KEEPALIVE_INTERVAL_SECS`: Ping interval to subscribers (default: 15)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: tradepulse-hub)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use trade_pulse::infrastructure::telemetry;
use trade_pulse::{
    ApiServer, AppState, BroadcastConfig, BroadcastHub, HealthServer, HealthServerState,
    HubConfig, MARKET_HUB_PATH, PUBLISH_PATH, await_shutdown_signal, init_metrics, load_dotenv,
};

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting TradePulse hub");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = HubConfig::from_env();
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let hub = Arc::new(BroadcastHub::new(BroadcastConfig::from(
        config.broadcast.clone(),
    )));

    let api_state = Arc::new(AppState::new(
        hub,
        config.server.keepalive_interval,
        shutdown_token.clone(),
    ));
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(api_state.hub()),
        shutdown_token.clone(),
    ));
    let api_server = ApiServer::new(config.server.api_port, api_state);
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    let api_shutdown = shutdown_token.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api_server.run().await {
            tracing::error!(error = %e, "API server error");
            api_shutdown.cancel();
        }
    });

    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("TradePulse hub ready");

    tokio::select! {
        () = await_shutdown_signal() => shutdown_token.cancel(),
        () = shutdown_token.cancelled() => {}
    }

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
    drain(api_handle, health_handle).await;

    tracing::info!("TradePulse hub stopped");
    Ok(())
}

/// Wait for the servers to finish, bounded by `SHUTDOWN_TIMEOUT`.
async fn drain(api: JoinHandle<()>, health: JoinHandle<()>) {
    let both = async {
        let _ = tokio::join!(api, health);
    };

    if tokio::time::timeout(SHUTDOWN_TIMEOUT, both).await.is_err() {
        tracing::warn!(
            timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
            "Servers did not stop in time"
        );
    }
}

/// Log the parsed configuration.
fn log_config(config: &HubConfig) {
    tracing::info!(
        api_port = config.server.api_port,
        health_port = config.server.health_port,
        subscriber_queue_capacity = config.broadcast.subscriber_queue_capacity,
        keepalive_secs = config.server.keepalive_interval.as_secs(),
        "Configuration loaded"
    );
    tracing::debug!(
        hub_path = MARKET_HUB_PATH,
        publish_path = PUBLISH_PATH,
        "Endpoints"
    );
}
