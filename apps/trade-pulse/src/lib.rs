#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation
    )
)]

//! TradePulse - Real-time Market Event Hub
//!
//! Accepts market price events from producers and fans them out to every
//! connected WebSocket subscriber. Also ships the subscriber side: a
//! connection manager with an explicit state machine and a fixed reconnect
//! schedule.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and rules
//!   - `market`: Market event model and derived analytics
//!   - `connection`: Subscriber state machine and reconnect schedule
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Publisher and client transport interfaces
//!   - `services`: Publish validation, subscriber connection manager
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `broadcast`: Per-subscriber fan-out hub
//!   - `codec`: Hub wire frames
//!   - `server`: WebSocket hub endpoint and publish endpoint
//!   - `transport`: WebSocket client transport
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!
//! # Data Flow
//!
//! ```text
//! POST /api/market/update
//!         │
//!         ▼
//!   PublishService ──► BroadcastHub ──┬──► queue ──► socket ──► Subscriber 1
//!                                     ├──► queue ──► socket ──► Subscriber 2
//!                                     └──► queue ──► socket ──► Subscriber N
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core event types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{
    ConnectionState, ConnectionTrigger, DEFAULT_RECONNECT_DELAYS, ReconnectSchedule, StateChange,
};
pub use domain::market::{MarketEvent, Trend};

// Application services
pub use application::ports::{
    EventPublisher, MarketTransport, PublishReport, TransportError, TransportSession,
};
pub use application::services::{
    ListenerId, PublishError, PublishService, SubscriberConnection, SubscriberError,
};

// Infrastructure config
pub use infrastructure::config::{
    BroadcastSettings, ClientConfig, ConfigError, HubConfig, ServerSettings, WebSocketSettings,
    load_dotenv,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Broadcast hub
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastHub, BroadcastStats, SharedBroadcastHub, SubscriberId,
    SubscriberRegistration,
};

// API server
pub use infrastructure::server::{ApiServer, AppState, MARKET_HUB_PATH, PUBLISH_PATH, ServerError};

// Client transport
pub use infrastructure::transport::{WebSocketTransport, WebSocketTransportConfig};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Shutdown
pub use infrastructure::shutdown::await_shutdown_signal;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
