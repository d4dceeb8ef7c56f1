//! TradePulse Watch Binary
//!
//! Subscribes to a hub and logs every market event with its derived
//! analytics, plus every connection state change.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin pulse-watch
//! ```
//!
//! # Environment Variables
//!
//! - `PULSE_HUB_URL`: Hub endpoint (default: ws://127.0.0.1:5080/markethub)
//! - `PULSE_HANDSHAKE_TIMEOUT_SECS`: Connect and handshake bound (default: 15)
//! - `PULSE_SERVER_TIMEOUT_SECS`: Silence before the link counts as dropped (default: 30)
//! - `PULSE_RECONNECT_DELAYS_SECS`: Reconnect delays in seconds (default: 0,2,10,30)
//! - `OTEL_SERVICE_NAME`: Service name (default: tradepulse-watch)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use trade_pulse::infrastructure::telemetry::{self, TelemetryConfig, WATCH_SERVICE_NAME};
use trade_pulse::{
    ClientConfig, ConnectionState, ReconnectSchedule, SubscriberConnection, WebSocketTransport,
    WebSocketTransportConfig, await_shutdown_signal, load_dotenv,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    load_dotenv();

    let _telemetry_guard =
        telemetry::init_with_config(TelemetryConfig::from_env(WATCH_SERVICE_NAME));

    let config = ClientConfig::from_env()?;
    let schedule = ReconnectSchedule::new(config.websocket.reconnect_delays.clone());
    tracing::info!(
        hub_url = %config.hub_url,
        handshake_timeout_secs = config.websocket.handshake_timeout.as_secs(),
        server_timeout_secs = config.websocket.server_timeout.as_secs(),
        reconnect_delays = ?schedule.delays(),
        "Configuration loaded"
    );

    let transport = WebSocketTransport::new(WebSocketTransportConfig::from(&config));
    let connection = SubscriberConnection::new(Arc::new(transport), schedule);

    connection.on_event(|event| {
        tracing::info!(
            symbol = %event.symbol,
            price = ?event.price,
            change = ?event.change(),
            change_percent = ?event.change_percent().map(|p| p.round_dp(2)),
            trend = event.trend.as_str(),
            implied_trend = event.implied_trend().as_str(),
            timestamp = ?event.timestamp,
            "Market event"
        );
        Ok(())
    });

    let (settled_tx, mut settled_rx) = tokio::sync::watch::channel(false);
    connection.on_state_change(move |change| {
        if let Some(error) = &change.error {
            tracing::warn!(from = %change.previous, to = %change.current, error = %error, "Connection state");
        } else {
            tracing::info!(from = %change.previous, to = %change.current, "Connection state");
        }
        if change.current == ConnectionState::Disconnected {
            let _ = settled_tx.send(true);
        }
        Ok(())
    });

    connection.start().await?;

    tokio::select! {
        () = await_shutdown_signal() => {}
        _ = settled_rx.wait_for(|settled| *settled) => {
            tracing::error!("Hub connection lost for good");
        }
    }

    connection.dispose().await;
    tracing::info!("Watcher stopped");
    Ok(())
}
